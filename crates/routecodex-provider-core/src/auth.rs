use std::path::PathBuf;

use routecodex_store::paths;
use routecodex_store::token_file::{TokenPayload, read_token_file};

use crate::config::AuthConfig;
use crate::errors::{ProviderError, ProviderResult};
use crate::headers::{Headers, header_set};

/// Builds upstream auth headers from the configured credential source.
///
/// Token-file variants re-read the file on every build so an external
/// refresh (daemon or vendor CLI) is observed without restarting.
#[derive(Debug, Clone)]
pub enum AuthProvider {
    ApiKey { key: String },
    TokenFile { path: PathBuf },
}

impl AuthProvider {
    pub fn from_config(auth: &AuthConfig) -> ProviderResult<Self> {
        match auth {
            AuthConfig::ApiKey { key } => {
                if key.trim().is_empty() {
                    return Err(ProviderError::MissingCredential("api key"));
                }
                Ok(AuthProvider::ApiKey { key: key.clone() })
            }
            AuthConfig::OAuth { provider, alias } => Ok(AuthProvider::TokenFile {
                path: paths::auth_dir(provider).join(format!("{alias}.json")),
            }),
            AuthConfig::TokenFile { path } => Ok(AuthProvider::TokenFile {
                path: PathBuf::from(path),
            }),
        }
    }

    pub fn token_file_path(&self) -> Option<&PathBuf> {
        match self {
            AuthProvider::TokenFile { path } => Some(path),
            AuthProvider::ApiKey { .. } => None,
        }
    }

    /// Current token payload for providers that need more than the header
    /// (Qwen `resource_url`, Gemini-CLI `project_id`).
    pub async fn read_payload(&self) -> ProviderResult<Option<TokenPayload>> {
        match self {
            AuthProvider::ApiKey { .. } => Ok(None),
            AuthProvider::TokenFile { path } => {
                let payload = read_token_file(path)
                    .await
                    .map_err(|err| ProviderError::Auth(err.to_string()))?;
                Ok(Some(payload))
            }
        }
    }

    pub async fn apply(&self, headers: &mut Headers) -> ProviderResult<()> {
        match self {
            AuthProvider::ApiKey { key } => {
                header_set(headers, "Authorization", format!("Bearer {key}"));
                Ok(())
            }
            AuthProvider::TokenFile { path } => {
                let payload = read_token_file(path)
                    .await
                    .map_err(|err| ProviderError::Auth(err.to_string()))?;
                let secret = payload
                    .bearer_secret()
                    .ok_or(ProviderError::MissingCredential("access_token"))?;
                header_set(headers, "Authorization", format!("Bearer {secret}"));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{base_headers, header_get};
    use routecodex_store::token_file::write_token_file;

    #[tokio::test]
    async fn api_key_from_token_file_beats_access_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.json");
        write_token_file(
            &path,
            &TokenPayload {
                access_token: "at".to_string(),
                api_key: Some("ak".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let auth = AuthProvider::TokenFile { path };
        let mut headers = base_headers();
        auth.apply(&mut headers).await.unwrap();
        assert_eq!(header_get(&headers, "authorization"), Some("Bearer ak"));
    }

    #[tokio::test]
    async fn external_token_update_is_observed_on_next_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("default.json");
        write_token_file(
            &path,
            &TokenPayload {
                access_token: "old".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let auth = AuthProvider::TokenFile { path: path.clone() };
        let mut headers = base_headers();
        auth.apply(&mut headers).await.unwrap();
        assert_eq!(header_get(&headers, "authorization"), Some("Bearer old"));

        write_token_file(
            &path,
            &TokenPayload {
                access_token: "new".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let mut headers = base_headers();
        auth.apply(&mut headers).await.unwrap();
        assert_eq!(header_get(&headers, "authorization"), Some("Bearer new"));
    }

    #[test]
    fn empty_api_key_is_rejected_at_construction() {
        let err = AuthProvider::from_config(&AuthConfig::ApiKey {
            key: "  ".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential(_)));
    }
}
