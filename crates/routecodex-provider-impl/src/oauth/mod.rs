use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

use routecodex_provider_core::{ProviderError, ProviderResult};
use routecodex_store::now_epoch_ms;
use routecodex_store::token_file::{TokenPayload, read_token_file, write_token_file};

pub mod authcode;
pub mod device;
pub mod pkce;

/// Refresh window: refresh once `expires_at - now` drops below this.
pub const REFRESH_BUFFER_MS: i64 = 60_000;
pub const REFRESH_MAX_RETRIES: u32 = 3;

/// Which interactive flow a provider family starts with when a refresh is
/// not possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPreference {
    DeviceFirst,
    AuthCodeFirst,
}

/// OAuth endpoint set for one provider family.
///
/// `device_urls` is an ordered candidate list: some vendors expose the
/// device endpoint under two paths and two hosts, and the next candidate is
/// tried when one answers 404 or non-JSON.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub device_urls: Vec<String>,
    pub auth_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: String,
    pub flow: FlowPreference,
}

impl OAuthEndpoints {
    /// Apply per-deployment endpoint overrides from the provider config's
    /// `extensions` bag (`oauth_token_url`, `oauth_auth_url`,
    /// `oauth_device_url`). Self-hosted relays and tests point these at
    /// their own token service.
    pub fn with_overrides(mut self, extensions: &Map<String, JsonValue>) -> Self {
        if let Some(url) = extensions.get("oauth_token_url").and_then(|value| value.as_str()) {
            self.token_url = url.to_string();
        }
        if let Some(url) = extensions.get("oauth_auth_url").and_then(|value| value.as_str()) {
            self.auth_url = url.to_string();
        }
        if let Some(url) = extensions.get("oauth_device_url").and_then(|value| value.as_str()) {
            self.device_urls = vec![url.to_string()];
        }
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnsureOptions {
    pub open_browser: bool,
    pub force_reauthorize: bool,
    pub force_reacquire_if_refresh_fails: bool,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            open_browser: true,
            force_reauthorize: false,
            force_reacquire_if_refresh_fails: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenEndpointResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub resource_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl TokenEndpointResponse {
    /// Merge onto the previous payload: the endpoint may omit the refresh
    /// token and vendor extras on renewal.
    pub(crate) fn into_payload(self, previous: Option<&TokenPayload>) -> TokenPayload {
        let expires_at = self
            .expires_in
            .map(|seconds| now_epoch_ms() + seconds * 1000);
        TokenPayload {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous.and_then(|prev| prev.refresh_token.clone())),
            token_type: self
                .token_type
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
            scope: self.scope.or_else(|| previous.and_then(|prev| prev.scope.clone())),
            api_key: previous.and_then(|prev| prev.api_key.clone()),
            resource_url: self
                .resource_url
                .or_else(|| previous.and_then(|prev| prev.resource_url.clone())),
            project_id: previous.and_then(|prev| prev.project_id.clone()),
            extra: previous.map(|prev| prev.extra.clone()).unwrap_or_default(),
        }
    }
}

fn is_fresh(payload: &TokenPayload) -> bool {
    match payload.expires_at {
        Some(expires_at) => expires_at - now_epoch_ms() > REFRESH_BUFFER_MS,
        None => !payload.access_token.is_empty(),
    }
}

/// Per-token-file single-flight guards: concurrent callers for the same
/// file share one refresh.
fn flight_guard(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    static GUARDS: OnceLock<std::sync::Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
        OnceLock::new();
    let guards = GUARDS.get_or_init(|| std::sync::Mutex::new(HashMap::new()));
    let mut map = guards.lock().expect("oauth flight guard map poisoned");
    map.entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

/// Guarantee a usable token on disk and return it.
///
/// Order: read file → (missing or forced) full flow → (expiring and
/// refreshable) refresh with retry → (refresh dead and allowed) full flow.
/// The winning payload is persisted atomically before returning.
pub async fn ensure_valid_oauth_token(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    token_path: &Path,
    options: EnsureOptions,
) -> ProviderResult<TokenPayload> {
    let guard = flight_guard(token_path);
    let _flight = guard.lock().await;

    // Re-read under the guard: a concurrent caller may have refreshed while
    // this one was queued.
    let existing = match read_token_file(token_path).await.ok() {
        Some(payload) if !options.force_reauthorize => payload,
        _ => {
            let payload = run_interactive_flow(client, endpoints, options.open_browser).await?;
            write_token_file(token_path, &payload)
                .await
                .map_err(|err| ProviderError::Auth(err.to_string()))?;
            return Ok(payload);
        }
    };

    if is_fresh(&existing) {
        return Ok(existing);
    }

    if let Some(refresh_token) = existing.refresh_token.clone().filter(|token| !token.is_empty()) {
        match refresh_tokens_with_retry(client, endpoints, &refresh_token, Some(&existing)).await {
            Ok(payload) => {
                write_token_file(token_path, &payload)
                    .await
                    .map_err(|err| ProviderError::Auth(err.to_string()))?;
                return Ok(payload);
            }
            Err(err) if options.force_reacquire_if_refresh_fails => {
                warn!(event = "oauth_refresh_failed_reacquiring", error = %err);
            }
            Err(err) => return Err(err),
        }
    } else if !options.force_reacquire_if_refresh_fails {
        return Err(ProviderError::MissingCredential("refresh_token"));
    }

    let payload = run_interactive_flow(client, endpoints, options.open_browser).await?;
    write_token_file(token_path, &payload)
        .await
        .map_err(|err| ProviderError::Auth(err.to_string()))?;
    Ok(payload)
}

async fn run_interactive_flow(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    open_browser: bool,
) -> ProviderResult<TokenPayload> {
    match endpoints.flow {
        FlowPreference::DeviceFirst => device::run_device_flow(client, endpoints, open_browser).await,
        FlowPreference::AuthCodeFirst => {
            match authcode::run_authcode_flow(client, endpoints, open_browser).await {
                Ok(payload) => Ok(payload),
                Err(err) => {
                    warn!(event = "oauth_authcode_failed_trying_device", error = %err);
                    device::run_device_flow(client, endpoints, open_browser).await
                }
            }
        }
    }
}

/// Refresh-token grant with bounded retry: attempt `n` sleeps `n` seconds
/// first (n starting at 0).
pub async fn refresh_tokens_with_retry(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    refresh_token: &str,
    previous: Option<&TokenPayload>,
) -> ProviderResult<TokenPayload> {
    let mut last_err = ProviderError::Auth("refresh not attempted".to_string());
    for attempt in 0..REFRESH_MAX_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
        }
        match refresh_once(client, endpoints, refresh_token, previous).await {
            Ok(payload) => {
                info!(event = "oauth_refresh_ok", attempt = attempt + 1);
                return Ok(payload);
            }
            Err(err) => {
                warn!(event = "oauth_refresh_attempt_failed", attempt = attempt + 1, error = %err);
                // 4xx from the token endpoint means the grant itself is dead;
                // retrying cannot revive it.
                let fatal = matches!(&err, ProviderError::Http { status, .. } if *status < 500 && *status != 429);
                last_err = err;
                if fatal {
                    break;
                }
            }
        }
    }
    Err(last_err)
}

async fn refresh_once(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    refresh_token: &str,
    previous: Option<&TokenPayload>,
) -> ProviderResult<TokenPayload> {
    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("client_id", endpoints.client_id.clone()),
        ("refresh_token", refresh_token.to_string()),
    ];
    if let Some(secret) = &endpoints.client_secret {
        form.push(("client_secret", secret.clone()));
    }

    let response = client
        .post(&endpoints.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|err| ProviderError::Network(err.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|err| ProviderError::Network(err.to_string()))?;
    if !(200..300).contains(&status) {
        return Err(ProviderError::Http {
            status,
            message: "token refresh rejected".to_string(),
            body: serde_json::from_slice(&body).ok(),
            report: None,
        });
    }

    let parsed: TokenEndpointResponse = serde_json::from_slice(&body)
        .map_err(|err| ProviderError::Auth(format!("malformed token response: {err}")))?;
    Ok(parsed.into_payload(previous))
}

/// Invalid-token recovery hook for the send path. When the upstream error
/// looks like an expired/invalid OAuth token, refresh once and tell the
/// caller to retry exactly once with fresh headers.
pub async fn handle_upstream_invalid_oauth_token(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    token_path: &Path,
    error: &ProviderError,
) -> bool {
    if !error.is_invalid_token() {
        return false;
    }
    let Ok(existing) = read_token_file(token_path).await else {
        return false;
    };
    let Some(refresh_token) = existing.refresh_token.clone() else {
        return false;
    };

    let guard = flight_guard(token_path);
    let _flight = guard.lock().await;
    match refresh_tokens_with_retry(client, endpoints, &refresh_token, Some(&existing)).await {
        Ok(payload) => {
            if let Err(err) = write_token_file(token_path, &payload).await {
                warn!(event = "oauth_refreshed_token_persist_failed", error = %err);
                return false;
            }
            true
        }
        Err(err) => {
            warn!(event = "oauth_401_refresh_failed", error = %err);
            false
        }
    }
}
