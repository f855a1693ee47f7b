use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::{StoreError, now_epoch_ms};

/// One line of the append-only daemon event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub event: String,
    pub at: i64,
    pub provider: String,
    pub alias: String,
    pub file_path: String,
    pub duration_ms: i64,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only JSONL sink (`token-daemon-events.log`).
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, mut event: DaemonEvent) -> Result<(), StoreError> {
        if event.at == 0 {
            event.at = now_epoch_ms();
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }
        let mut line =
            serde_json::to_vec(&event).map_err(|err| StoreError::json(&self.path, err))?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;
        file.write_all(&line)
            .await
            .map_err(|err| StoreError::io(&self.path, err))
    }

    pub async fn refresh_result(
        &self,
        success: bool,
        provider: &str,
        alias: &str,
        file_path: &str,
        duration_ms: i64,
        mode: &str,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let event = if success {
            "token-refresh-success"
        } else {
            "token-refresh-failure"
        };
        self.append(DaemonEvent {
            event: event.to_string(),
            at: 0,
            provider: provider.to_string(),
            alias: alias.to_string(),
            file_path: file_path.to_string(),
            duration_ms,
            mode: mode.to_string(),
            error,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.log"));
        log.refresh_result(true, "qwen", "default", "/t/qwen.json", 42, "auto", None)
            .await
            .unwrap();
        log.refresh_result(
            false,
            "glm",
            "work",
            "/t/glm.json",
            7,
            "manual",
            Some("invalid_grant".to_string()),
        )
        .await
        .unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("events.log"))
            .await
            .unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DaemonEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, "token-refresh-success");
        let second: DaemonEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.error.as_deref(), Some("invalid_grant"));
    }
}
