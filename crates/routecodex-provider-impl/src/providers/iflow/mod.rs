use async_trait::async_trait;
use tracing::warn;

use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderError, ProviderReply, ProviderRequest, ProviderResult,
    ProviderStatus,
};
use routecodex_store::token_file::{read_token_file, write_token_file};

use crate::oauth::{EnsureOptions, FlowPreference, OAuthEndpoints, ensure_valid_oauth_token};

use super::upstream::UpstreamCore;

const PROVIDER_NAME: &str = "iflow";
const DEFAULT_BASE_URL: &str = "https://apis.iflow.cn/v1";
const AUTH_URL: &str = "https://iflow.cn/oauth/authorize";
const TOKEN_URL: &str = "https://iflow.cn/oauth/token";
const USER_INFO_URL: &str = "https://iflow.cn/api/oauth/getUserInfo";
const CLIENT_ID: &str = "10009311001";
const CLIENT_SECRET: &str = "4Z3YjXycVsQvyGF6etEUOvZdrXBvWOFn";
const OAUTH_SCOPE: &str = "openid profile api";

/// The device endpoint is spelled two ways across two hosts; candidates are
/// walked in order on 404 / non-JSON answers.
pub fn oauth_endpoints() -> OAuthEndpoints {
    OAuthEndpoints {
        device_urls: vec![
            "https://iflow.cn/oauth/device_code".to_string(),
            "https://iflow.cn/oauth/device/code".to_string(),
            "https://api.iflow.cn/oauth/device_code".to_string(),
            "https://api.iflow.cn/oauth/device/code".to_string(),
        ],
        auth_url: AUTH_URL.to_string(),
        token_url: TOKEN_URL.to_string(),
        client_id: CLIENT_ID.to_string(),
        client_secret: Some(CLIENT_SECRET.to_string()),
        scope: OAUTH_SCOPE.to_string(),
        flow: FlowPreference::AuthCodeFirst,
    }
}

pub struct IflowProvider {
    core: UpstreamCore,
}

impl IflowProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        let endpoints = oauth_endpoints().with_overrides(&config.provider.extensions);
        Ok(Self {
            core: UpstreamCore::new(
                PROVIDER_NAME,
                config,
                wire_model,
                DEFAULT_BASE_URL,
                Some(endpoints),
            )?,
        })
    }

    /// The chat endpoint authenticates with an apiKey that the OAuth token
    /// merely unlocks: fetch it via `getUserInfo?accessToken=…` and persist
    /// it into the token file. Best effort; the access token still works as
    /// a bearer when this fails.
    async fn attach_api_key(&self) -> ProviderResult<()> {
        let Some(token_path) = self.core.auth.token_file_path() else {
            return Ok(());
        };
        let mut payload = read_token_file(token_path)
            .await
            .map_err(|err| ProviderError::Auth(err.to_string()))?;
        if payload.api_key.is_some() || payload.access_token.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{USER_INFO_URL}?accessToken={}",
            urlencoding::encode(&payload.access_token)
        );
        let response = self
            .core
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        let api_key = body
            .get("data")
            .and_then(|data| data.get("apiKey"))
            .and_then(|key| key.as_str())
            .map(|key| key.to_string());
        let Some(api_key) = api_key else {
            warn!(event = "iflow_userinfo_no_apikey");
            return Ok(());
        };
        payload.api_key = Some(api_key);
        write_token_file(token_path, &payload)
            .await
            .map_err(|err| ProviderError::Auth(err.to_string()))
    }
}

#[async_trait]
impl Provider for IflowProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize(&self) -> ProviderResult<()> {
        if let Some(token_path) = self.core.auth.token_file_path()
            && let Some(endpoints) = &self.core.oauth
        {
            ensure_valid_oauth_token(
                &self.core.client,
                endpoints,
                token_path,
                EnsureOptions {
                    open_browser: true,
                    force_reauthorize: false,
                    force_reacquire_if_refresh_fails: false,
                },
            )
            .await?;
            if let Err(err) = self.attach_api_key().await {
                warn!(event = "iflow_apikey_attach_failed", error = %err);
            }
        }
        self.core.mark_initialized();
        Ok(())
    }

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply> {
        let body = self.core.preprocess_flat_body(&request);
        let timeout = self.core.resolve_timeout(None, None);
        self.core
            .send_json(&request, "/chat/completions", body, &[], timeout)
            .await
    }

    async fn check_health(&self) -> ProviderResult<bool> {
        self.core.check_health_get("/models").await
    }

    async fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        self.core.status()
    }
}
