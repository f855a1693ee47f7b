use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::token_file::{TokenPayload, read_token_file};
use crate::{StoreError, now_epoch_ms, paths};

/// Refresh window: a token is `expiring` inside this buffer before
/// `expires_at`.
pub const EXPIRY_BUFFER_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Valid,
    Expiring,
    Expired,
    Invalid,
    /// Readable but carries no refresh token and no expiry; refresh cannot help.
    Norefresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
    pub status: TokenStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms_until_expiry: Option<i64>,
}

/// A discovered token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub provider: String,
    pub alias: String,
    pub sequence: usize,
    pub file_path: PathBuf,
    pub display_name: String,
    pub state: TokenState,
    #[serde(default)]
    pub has_refresh_token: bool,
}

impl TokenDescriptor {
    /// Key used by the history journal: `<provider>:<alias>`.
    pub fn history_key(&self) -> String {
        format!("{}:{}", self.provider, self.alias)
    }

    /// Aliases named `static` hold operator-provisioned credentials and are
    /// never refreshed.
    pub fn is_static(&self) -> bool {
        self.alias == "static"
    }
}

pub fn evaluate_state(payload: &TokenPayload, now_ms: i64) -> TokenState {
    let Some(expires_at) = payload.expires_at else {
        let status = if payload.has_refresh_token() {
            TokenStatus::Valid
        } else {
            TokenStatus::Norefresh
        };
        return TokenState {
            status,
            expires_at: None,
            ms_until_expiry: None,
        };
    };

    let remaining = expires_at - now_ms;
    let status = if remaining <= 0 {
        TokenStatus::Expired
    } else if remaining < EXPIRY_BUFFER_MS {
        TokenStatus::Expiring
    } else {
        TokenStatus::Valid
    };
    TokenState {
        status,
        expires_at: Some(expires_at),
        ms_until_expiry: Some(remaining),
    }
}

/// Enumerate token files for the given providers: the gateway-managed
/// `auth/<provider>/<alias>.json` tree plus each vendor CLI's
/// `~/.<provider>/oauth_creds.json`.
pub async fn scan_tokens(providers: &[String]) -> Result<Vec<TokenDescriptor>, StoreError> {
    let now_ms = now_epoch_ms();
    let mut descriptors = Vec::new();
    let mut sequence = 0usize;

    for provider in providers {
        let dir = paths::auth_dir(provider);
        let mut aliases = list_alias_files(&dir).await;
        aliases.sort();
        for (alias, file_path) in aliases {
            if let Some(descriptor) =
                describe(provider, &alias, file_path, &mut sequence, now_ms).await
            {
                descriptors.push(descriptor);
            }
        }

        let vendor = paths::vendor_creds_file(provider);
        if tokio::fs::try_exists(&vendor).await.unwrap_or(false)
            && let Some(descriptor) =
                describe(provider, "default", vendor, &mut sequence, now_ms).await
        {
            descriptors.push(descriptor);
        }
    }

    Ok(descriptors)
}

async fn list_alias_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut out = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return out;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(alias) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        out.push((alias.to_string(), path));
    }
    out
}

async fn describe(
    provider: &str,
    alias: &str,
    file_path: PathBuf,
    sequence: &mut usize,
    now_ms: i64,
) -> Option<TokenDescriptor> {
    *sequence += 1;
    let (state, has_refresh_token) = match read_token_file(&file_path).await {
        Ok(payload) => (evaluate_state(&payload, now_ms), payload.has_refresh_token()),
        Err(StoreError::Json { .. }) => (
            TokenState {
                status: TokenStatus::Invalid,
                expires_at: None,
                ms_until_expiry: None,
            },
            false,
        ),
        Err(_) => return None,
    };
    Some(TokenDescriptor {
        provider: provider.to_string(),
        alias: alias.to_string(),
        sequence: *sequence,
        display_name: format!("{provider}/{alias}"),
        file_path,
        state,
        has_refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_windows_are_classified() {
        let mut payload = TokenPayload {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            ..Default::default()
        };
        let now = 1_000_000;

        payload.expires_at = Some(now + EXPIRY_BUFFER_MS * 2);
        assert_eq!(evaluate_state(&payload, now).status, TokenStatus::Valid);

        payload.expires_at = Some(now + EXPIRY_BUFFER_MS / 2);
        assert_eq!(evaluate_state(&payload, now).status, TokenStatus::Expiring);

        payload.expires_at = Some(now - 1);
        assert_eq!(evaluate_state(&payload, now).status, TokenStatus::Expired);
    }

    #[test]
    fn token_without_expiry_or_refresh_is_norefresh() {
        let payload = TokenPayload {
            access_token: "a".to_string(),
            ..Default::default()
        };
        assert_eq!(evaluate_state(&payload, 0).status, TokenStatus::Norefresh);
    }
}
