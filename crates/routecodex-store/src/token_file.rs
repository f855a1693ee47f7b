use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::StoreError;

/// On-disk OAuth token payload.
///
/// `expires_at` is absolute epoch milliseconds. When `api_key` is present it
/// takes precedence over `access_token` for the Authorization header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenPayload {
    #[serde(default)]
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(rename = "apiKey", alias = "api_key", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenPayload {
    /// Header credential: `apiKey` wins over `access_token`.
    pub fn bearer_secret(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .or_else(|| (!self.access_token.is_empty()).then_some(self.access_token.as_str()))
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

/// Read a token file, migrating legacy `expiry_date` (epoch-ms or epoch-s)
/// to `expires_at`.
pub async fn read_token_file(path: &Path) -> Result<TokenPayload, StoreError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|err| StoreError::io(path, err))?;
    let mut value: JsonValue =
        serde_json::from_slice(&raw).map_err(|err| StoreError::json(path, err))?;

    if let Some(map) = value.as_object_mut()
        && !map.contains_key("expires_at")
        && let Some(legacy) = map.remove("expiry_date")
        && let Some(legacy_ms) = legacy.as_i64()
    {
        // Heuristic: vendor CLIs wrote either seconds or milliseconds.
        let ms = if legacy_ms < 10_000_000_000 {
            legacy_ms * 1000
        } else {
            legacy_ms
        };
        map.insert("expires_at".to_string(), JsonValue::from(ms));
    }

    serde_json::from_value(value).map_err(|err| StoreError::json(path, err))
}

/// Persist a token payload atomically: mkdir -p, write `<file>.tmp`, rename.
/// Rename is the ownership-transfer point between gateway and daemon.
pub async fn write_token_file(path: &Path, payload: &TokenPayload) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StoreError::io(parent, err))?;
    }
    let raw = serde_json::to_vec_pretty(payload).map_err(|err| StoreError::json(path, err))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &raw)
        .await
        .map_err(|err| StoreError::io(&tmp, err))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|err| StoreError::io(path, err))
}

/// File mtime in epoch milliseconds, `None` when the file is gone.
pub async fn token_file_mtime_ms(path: &Path) -> Option<i64> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let mtime = meta.modified().ok()?;
    let since = mtime.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_and_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qwen").join("default.json");
        let payload = TokenPayload {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(1_900_000_000_000),
            ..Default::default()
        };
        write_token_file(&path, &payload).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let read = read_token_file(&path).await.unwrap();
        assert_eq!(read.access_token, "at");
        assert!(read.has_refresh_token());
    }

    #[tokio::test]
    async fn legacy_expiry_date_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        tokio::fs::write(
            &path,
            r#"{"access_token": "a", "token_type": "Bearer", "expiry_date": 1900000000}"#,
        )
        .await
        .unwrap();
        let payload = read_token_file(&path).await.unwrap();
        assert_eq!(payload.expires_at, Some(1_900_000_000_000));
    }

    #[tokio::test]
    async fn api_key_wins_over_access_token() {
        let payload = TokenPayload {
            access_token: "at".to_string(),
            api_key: Some("ak".to_string()),
            ..Default::default()
        };
        assert_eq!(payload.bearer_secret(), Some("ak"));
    }
}
