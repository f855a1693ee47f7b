use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use routecodex_common::{env_keys, env_u64};
use routecodex_protocol::sse::{SseDecoder, SseFrame, provider_done_frame};
use routecodex_provider_core::{
    AuthProvider, Headers, PipelineConfig, ProviderError, ProviderReply, ProviderRequest,
    ProviderResponse, ProviderResult, ProviderStatus, ResponseMetadata, header_set,
};
use routecodex_store::SnapshotWriter;

use crate::http_client::shared_client;
use crate::oauth::{OAuthEndpoints, handle_upstream_invalid_oauth_token};

pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub(crate) const DEFAULT_MAX_TOKENS: i64 = 8192;
/// SSE requests get a generous ceiling; the consumer drop ends them sooner.
pub(crate) const SSE_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Default)]
struct Stats {
    initialized: bool,
    requests_sent: u64,
    last_error: Option<String>,
}

/// Where the credential goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AuthStyle {
    #[default]
    Bearer,
    /// Google API surfaces take `x-goog-api-key` instead of a bearer.
    GoogApiKey,
    /// Anthropic takes `x-api-key`.
    XApiKey,
}

/// Shared plumbing for every concrete provider: client, auth, timeout and
/// max-token resolution, snapshots, the POST/retry/401 algorithm, and SSE
/// pumping. Provider modules own the wire shape; this owns the transport.
pub(crate) struct UpstreamCore {
    pub config: PipelineConfig,
    pub auth: AuthProvider,
    pub oauth: Option<OAuthEndpoints>,
    pub client: wreq::Client,
    pub base_url: String,
    pub provider_type: &'static str,
    pub wire_model: String,
    pub snapshots: SnapshotWriter,
    auth_style: AuthStyle,
    stats: Mutex<Stats>,
}

impl UpstreamCore {
    pub fn new(
        provider_type: &'static str,
        config: PipelineConfig,
        wire_model: String,
        default_base_url: &str,
        oauth: Option<OAuthEndpoints>,
    ) -> ProviderResult<Self> {
        let auth = AuthProvider::from_config(&config.provider.auth)?;
        let base_url = config
            .provider
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());
        if base_url.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(format!(
                "{provider_type}: base_url is required"
            )));
        }
        Ok(Self {
            config,
            auth,
            oauth,
            client: shared_client(None)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider_type,
            wire_model,
            snapshots: SnapshotWriter::new(),
            auth_style: AuthStyle::default(),
            stats: Mutex::new(Stats::default()),
        })
    }

    pub fn with_auth_style(mut self, auth_style: AuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    pub fn mark_initialized(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.initialized = true;
        }
    }

    pub fn status(&self) -> ProviderStatus {
        let stats = self.stats.lock().ok();
        ProviderStatus {
            provider_type: self.provider_type.to_string(),
            base_url: self.base_url.clone(),
            initialized: stats.as_ref().is_some_and(|stats| stats.initialized),
            requests_sent: stats.as_ref().map(|stats| stats.requests_sent).unwrap_or(0),
            last_error: stats.and_then(|stats| stats.last_error.clone()),
        }
    }

    fn record_sent(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.requests_sent += 1;
        }
    }

    fn record_error(&self, err: &ProviderError) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.last_error = Some(err.to_string());
        }
    }

    /// Timeout resolution: global env > provider env > config > profile
    /// default > 60 s.
    pub fn resolve_timeout(&self, provider_env: Option<&str>, profile_default_ms: Option<u64>) -> Duration {
        let ms = env_u64(env_keys::PROVIDER_TIMEOUT_MS)
            .or_else(|| provider_env.and_then(env_u64))
            .or_else(|| env_u64(env_keys::RCC_UPSTREAM_TIMEOUT_MS))
            .or(self.config.provider.timeout_ms)
            .or(profile_default_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    /// Max-token resolution: request > config override > env default > 8192.
    pub fn resolve_max_tokens(&self, requested: Option<i64>) -> i64 {
        requested
            .or(self.config.model.max_tokens)
            .or_else(|| env_u64(env_keys::DEFAULT_MAX_TOKENS).map(|value| value as i64))
            .unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn max_retries(&self) -> u32 {
        env_u64(env_keys::PROVIDER_RETRIES)
            .map(|value| value as u32)
            .or(self.config.provider.max_retries)
            .unwrap_or(0)
    }

    /// Generic body preprocessing for flat (OpenAI/Anthropic shaped)
    /// payloads: override the wire model, strip envelope fields and the
    /// stream flag, resolve max_tokens in place.
    pub fn preprocess_flat_body(&self, request: &ProviderRequest) -> JsonValue {
        let mut body = request.body.clone();
        if let Some(map) = body.as_object_mut() {
            map.insert("model".to_string(), JsonValue::from(self.wire_model.clone()));
            map.remove("metadata");
            map.remove("_metadata");
            map.remove("stream");
            let requested = map.get("max_tokens").and_then(|value| value.as_i64());
            map.insert(
                "max_tokens".to_string(),
                JsonValue::from(self.resolve_max_tokens(requested)),
            );
        }
        body
    }

    /// Base + service-profile + config-override + auth headers.
    pub async fn build_headers(
        &self,
        service_headers: &[(&str, &str)],
        sse: bool,
    ) -> ProviderResult<Headers> {
        let mut headers = routecodex_provider_core::headers::base_headers();
        for (name, value) in service_headers {
            header_set(&mut headers, *name, *value);
        }
        for (name, value) in &self.config.provider.headers {
            header_set(&mut headers, name.clone(), value.clone());
        }
        // OAuth-backed auth re-reads the token file here, so an in-flight
        // refresh is observed by the very next request.
        match self.auth_style {
            AuthStyle::Bearer => self.auth.apply(&mut headers).await?,
            AuthStyle::GoogApiKey => {
                let key = self.credential_secret().await?;
                header_set(&mut headers, "x-goog-api-key", key);
            }
            AuthStyle::XApiKey => {
                let key = self.credential_secret().await?;
                header_set(&mut headers, "x-api-key", key);
            }
        }
        let accept = if sse { "text/event-stream" } else { "application/json" };
        header_set(&mut headers, "Accept", accept);
        Ok(headers)
    }

    /// Raw credential for header styles that do not use a bearer.
    async fn credential_secret(&self) -> ProviderResult<String> {
        match &self.auth {
            routecodex_provider_core::AuthProvider::ApiKey { key } => Ok(key.clone()),
            _ => self
                .auth
                .read_payload()
                .await?
                .as_ref()
                .and_then(|payload| payload.bearer_secret().map(|secret| secret.to_string()))
                .ok_or(ProviderError::MissingCredential("access_token")),
        }
    }

    /// The non-streaming send algorithm: snapshot → POST with timeout and
    /// bounded retry → one refresh-and-retry on an invalid OAuth token →
    /// snapshot response (or error) → typed response envelope.
    pub async fn send_json(
        &self,
        request: &ProviderRequest,
        path: &str,
        body: JsonValue,
        service_headers: &[(&str, &str)],
        timeout: Duration,
    ) -> ProviderResult<ProviderReply> {
        let bucket = request.entry_endpoint.bucket();
        self.snapshots
            .write_request(bucket, &request.request_id, &body)
            .await;

        let started = Instant::now();
        let mut attempt = 0u32;
        let mut refreshed_auth = false;
        let mut headers = self.build_headers(service_headers, false).await?;

        let result = loop {
            attempt += 1;
            match self.post_once(path, &body, &headers, timeout).await {
                Ok((status, response_headers, response_body)) => {
                    break Ok((status, response_headers, response_body));
                }
                Err(err) => {
                    let invalid_token = self.oauth.is_some()
                        && !refreshed_auth
                        && err.is_invalid_token();
                    if invalid_token
                        && let (Some(endpoints), Some(token_path)) =
                            (&self.oauth, self.auth.token_file_path())
                        && handle_upstream_invalid_oauth_token(
                            &self.client,
                            endpoints,
                            token_path,
                            &err,
                        )
                        .await
                    {
                        // Exactly one retry with fresh headers.
                        refreshed_auth = true;
                        headers = self.build_headers(service_headers, false).await?;
                        info!(
                            event = "oauth_401_retry",
                            provider = %self.provider_type,
                            request_id = %request.request_id,
                        );
                        continue;
                    }
                    if err.retryable() && attempt <= self.max_retries() {
                        warn!(
                            event = "upstream_retry",
                            provider = %self.provider_type,
                            attempt = attempt,
                            error = %err,
                        );
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        match result {
            Ok((status, response_headers, data)) => {
                self.record_sent();
                self.snapshots
                    .write_response(bucket, &request.request_id, &data)
                    .await;
                self.snapshots
                    .write_pair(bucket, &request.request_id, &body, &data)
                    .await;
                let usage = data.get("usage").cloned();
                Ok(ProviderReply::Json(ProviderResponse {
                    data,
                    status,
                    headers: response_headers,
                    metadata: ResponseMetadata {
                        request_id: request.request_id.clone(),
                        processing_time_ms: started.elapsed().as_millis() as u64,
                        model: request.orig_model.clone(),
                        usage,
                    },
                }))
            }
            Err(err) => {
                self.record_error(&err);
                let error_body = serde_json::json!({
                    "error": err.to_string(),
                    "statusCode": err.status_code(),
                    "retryable": err.retryable(),
                });
                self.snapshots
                    .write_error(bucket, &request.request_id, &error_body)
                    .await;
                Err(err)
            }
        }
    }

    async fn post_once(
        &self,
        path: &str,
        body: &JsonValue,
        headers: &Headers,
        timeout: Duration,
    ) -> ProviderResult<(u16, Headers, JsonValue)> {
        let response = self.post_raw(path, body, headers, timeout).await?;
        let status = response.status().as_u16();
        let response_headers = collect_headers(&response);
        let raw = response
            .bytes()
            .await
            .map_err(map_transport_error)?;

        if !(200..300).contains(&status) {
            let body_json: Option<JsonValue> = serde_json::from_slice(&raw).ok();
            return Err(ProviderError::Http {
                status,
                message: upstream_error_message(&body_json, status),
                body: body_json,
                report: None,
            });
        }

        let data: JsonValue = serde_json::from_slice(&raw).map_err(|err| {
            ProviderError::Other(format!("malformed upstream response: {err}"))
        })?;
        Ok((status, response_headers, data))
    }

    async fn post_raw(
        &self,
        path: &str,
        body: &JsonValue,
        headers: &Headers,
        timeout: Duration,
    ) -> ProviderResult<wreq::Response> {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };
        let mut builder = self.client.post(&url).json(body);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        // Aborted sends surface as a 504-class timeout error.
        match tokio::time::timeout(timeout, builder.send()).await {
            Ok(result) => result.map_err(map_transport_error),
            Err(_) => Err(ProviderError::Timeout(format!(
                "upstream call exceeded {} ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Streaming send: the upstream SSE body is decoded frame-by-frame,
    /// passed through the provider's vendor normalizer, and pumped into a
    /// bounded channel as normalized `provider.data` lines. The pump stops
    /// when upstream closes or the consumer drops the receiver.
    pub async fn send_sse(
        &self,
        request: &ProviderRequest,
        path: &str,
        body: JsonValue,
        service_headers: &[(&str, &str)],
        normalize: fn(&SseFrame) -> Vec<String>,
    ) -> ProviderResult<ProviderReply> {
        let bucket = request.entry_endpoint.bucket();
        self.snapshots
            .write_request(bucket, &request.request_id, &body)
            .await;

        let started = Instant::now();
        let headers = self.build_headers(service_headers, true).await?;
        let response = self
            .post_raw(path, &body, &headers, Duration::from_millis(SSE_TIMEOUT_MS))
            .await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let raw = response.bytes().await.map_err(map_transport_error)?;
            let body_json: Option<JsonValue> = serde_json::from_slice(&raw).ok();
            let err = ProviderError::Http {
                status,
                message: upstream_error_message(&body_json, status),
                body: body_json,
                report: None,
            };
            self.record_error(&err);
            self.snapshots
                .write_error(
                    bucket,
                    &request.request_id,
                    &serde_json::json!({"error": err.to_string(), "statusCode": status}),
                )
                .await;
            return Err(err);
        }

        self.record_sent();
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(64);
        tokio::spawn(pump_sse(response, tx, normalize));

        Ok(ProviderReply::Sse {
            stream: rx,
            metadata: ResponseMetadata {
                request_id: request.request_id.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                model: request.orig_model.clone(),
                usage: None,
            },
        })
    }

    /// Health probe: GET the models endpoint; 2xx and 404 are both healthy.
    pub async fn check_health_get(&self, path: &str) -> ProviderResult<bool> {
        let mut headers = routecodex_provider_core::headers::base_headers();
        self.auth.apply(&mut headers).await?;
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.get(&url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = tokio::time::timeout(
            Duration::from_millis(DEFAULT_TIMEOUT_MS),
            builder.send(),
        )
        .await
        .map_err(|_| ProviderError::Timeout("health probe timed out".to_string()))?
        .map_err(map_transport_error)?;
        let status = response.status().as_u16();
        Ok((200..300).contains(&status) || status == 404)
    }
}

async fn pump_sse(
    response: wreq::Response,
    tx: tokio::sync::mpsc::Sender<Bytes>,
    normalize: fn(&SseFrame) -> Vec<String>,
) {
    use futures_util::StreamExt;

    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        for frame in decoder.feed_bytes(&chunk) {
            for line in normalize(&frame) {
                if tx.send(Bytes::from(line)).await.is_err() {
                    // Consumer went away; stop reading upstream.
                    return;
                }
            }
        }
    }
    for frame in decoder.finish() {
        for line in normalize(&frame) {
            if tx.send(Bytes::from(line)).await.is_err() {
                return;
            }
        }
    }
    let _ = tx.send(Bytes::from(provider_done_frame())).await;
}

fn collect_headers(response: &wreq::Response) -> Headers {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn upstream_error_message(body: &Option<JsonValue>, status: u16) -> String {
    body.as_ref()
        .and_then(|body| {
            body.get("error")
                .and_then(|error| error.get("message"))
                .or_else(|| body.get("message"))
                .and_then(|message| message.as_str())
                .map(|message| message.to_string())
        })
        .unwrap_or_else(|| format!("upstream returned HTTP {status}"))
}

const SOCKET_ERROR_MARKERS: [&str; 4] = [
    "ECONNREFUSED",
    "ENOTFOUND",
    "UND_ERR_SOCKET",
    "fetch failed",
];

pub(crate) fn map_transport_error(err: wreq::Error) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::Timeout(err.to_string());
    }
    let text = err.to_string();
    if err.is_connect() || SOCKET_ERROR_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ProviderError::Network(text);
    }
    ProviderError::Other(text)
}
