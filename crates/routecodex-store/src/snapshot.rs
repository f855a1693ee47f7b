use std::path::PathBuf;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{StoreError, paths};

/// Post-mortem snapshot writer.
///
/// Files land under `~/.routecodex/codex-samples/<bucket>/` as
/// `<request_id>_provider-request.json`, `_provider-response.json`,
/// `_provider-pair.json`, and `_provider-error.json`. Snapshot failures are
/// logged and swallowed: recording must never fail a live request.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    root: Option<PathBuf>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Redirect snapshots away from the home directory (tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(bucket),
            None => paths::snapshot_dir(bucket),
        }
    }

    pub async fn write_request(&self, bucket: &str, request_id: &str, body: &JsonValue) {
        self.write(bucket, request_id, "provider-request", body).await;
    }

    pub async fn write_response(&self, bucket: &str, request_id: &str, body: &JsonValue) {
        self.write(bucket, request_id, "provider-response", body).await;
    }

    pub async fn write_pair(
        &self,
        bucket: &str,
        request_id: &str,
        request: &JsonValue,
        response: &JsonValue,
    ) {
        let pair = serde_json::json!({"request": request, "response": response});
        self.write(bucket, request_id, "provider-pair", &pair).await;
    }

    pub async fn write_error(&self, bucket: &str, request_id: &str, body: &JsonValue) {
        self.write(bucket, request_id, "provider-error", body).await;
    }

    async fn write(&self, bucket: &str, request_id: &str, suffix: &str, body: &JsonValue) {
        if let Err(err) = self.try_write(bucket, request_id, suffix, body).await {
            warn!(event = "snapshot_write_failed", bucket = %bucket, request_id = %request_id, error = %err);
        }
    }

    async fn try_write(
        &self,
        bucket: &str,
        request_id: &str,
        suffix: &str,
        body: &JsonValue,
    ) -> Result<(), StoreError> {
        let dir = self.bucket_dir(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| StoreError::io(&dir, err))?;
        let path = dir.join(format!("{request_id}_{suffix}.json"));
        let raw = serde_json::to_vec_pretty(body).map_err(|err| StoreError::json(&path, err))?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|err| StoreError::io(&path, err))
    }

    /// Read one snapshot back (replay tooling and tests).
    pub async fn read(
        &self,
        bucket: &str,
        request_id: &str,
        suffix: &str,
    ) -> Result<JsonValue, StoreError> {
        let path = self
            .bucket_dir(bucket)
            .join(format!("{request_id}_{suffix}.json"));
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|err| StoreError::io(&path, err))?;
        serde_json::from_slice(&raw).map_err(|err| StoreError::json(&path, err))
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn request_and_response_snapshots_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::with_root(dir.path());
        let request = json!({"model": "glm-4.6", "messages": []});
        let response = json!({"id": "r1", "choices": []});

        writer.write_request("openai-chat", "req-1", &request).await;
        writer.write_response("openai-chat", "req-1", &response).await;
        writer
            .write_pair("openai-chat", "req-1", &request, &response)
            .await;

        let read_back = writer.read("openai-chat", "req-1", "provider-request").await.unwrap();
        assert_eq!(read_back, request);
        let pair = writer.read("openai-chat", "req-1", "provider-pair").await.unwrap();
        assert_eq!(pair["response"]["id"], "r1");
    }
}
