use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};

use routecodex_protocol::sse::{DONE_SENTINEL, SseFrame, provider_data_frame, provider_done_frame};
use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderError, ProviderReply, ProviderRequest, ProviderResult,
    ProviderStatus,
};

use crate::oauth::{EnsureOptions, FlowPreference, OAuthEndpoints, ensure_valid_oauth_token};

use super::gemini::shape_gemini_body;
use super::upstream::UpstreamCore;

const PROVIDER_NAME: &str = "geminicli";
const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLIENT_ID: &str = "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const CLIENT_SECRET: &str = "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";
const OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/userinfo.email https://www.googleapis.com/auth/userinfo.profile";

pub fn oauth_endpoints() -> OAuthEndpoints {
    OAuthEndpoints {
        device_urls: Vec::new(),
        auth_url: AUTH_URL.to_string(),
        token_url: TOKEN_URL.to_string(),
        client_id: CLIENT_ID.to_string(),
        client_secret: Some(CLIENT_SECRET.to_string()),
        scope: OAUTH_SCOPE.to_string(),
        flow: FlowPreference::AuthCodeFirst,
    }
}

/// Cloud-Code-Assist upstream used by the Gemini CLI account family.
/// Requests are wrapped in the `v1internal` envelope with the token's
/// `project`; responses come back as `{response: GeminiResponse}`. This is
/// the one provider that streams upstream.
pub struct GeminiCliProvider {
    core: UpstreamCore,
}

impl GeminiCliProvider {
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

    async fn project_id(&self) -> ProviderResult<String> {
        self.core
            .auth
            .read_payload()
            .await?
            .and_then(|payload| payload.project_id)
            .filter(|project| !project.is_empty())
            .ok_or(ProviderError::MissingCredential("project_id"))
    }

    async fn wrap_internal_request(&self, request: &ProviderRequest) -> ProviderResult<JsonValue> {
        let mut inner = request.body.clone();
        shape_gemini_body(&mut inner, &self.core);
        Ok(json!({
            "model": self.core.wire_model,
            "project": self.project_id().await?,
            "requestId": format!("req-{}", uuid::Uuid::new_v4()),
            "request": inner,
        }))
    }
}

#[async_trait]
impl Provider for GeminiCliProvider {
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
        }
        self.core.mark_initialized();
        Ok(())
    }

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply> {
        let wrapped = self.wrap_internal_request(&request).await?;

        if request.wants_stream {
            return self
                .core
                .send_sse(
                    &request,
                    "/v1internal:streamGenerateContent?alt=sse",
                    wrapped,
                    &[],
                    normalize_cloudcode_frame,
                )
                .await;
        }

        let reply = self
            .core
            .send_json(
                &request,
                "/v1internal:generateContent",
                wrapped,
                &[],
                self.core.resolve_timeout(None, None),
            )
            .await?;
        Ok(unwrap_envelope(reply))
    }

    async fn check_health(&self) -> ProviderResult<bool> {
        self.core.check_health_get("/v1internal:countTokens").await
    }

    async fn cleanup(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        self.core.status()
    }
}

/// Strip the `{response: …}` envelope from a non-streaming reply.
pub(crate) fn unwrap_envelope(reply: ProviderReply) -> ProviderReply {
    match reply {
        ProviderReply::Json(mut response) => {
            if let Some(inner) = response.data.get("response").cloned() {
                response.metadata.usage = inner.get("usageMetadata").cloned();
                response.data = inner;
            }
            ProviderReply::Json(response)
        }
        other => other,
    }
}

/// Vendor SSE frame → normalized `provider.data` frames carrying pivot
/// chat chunks. Cloud-Code-Assist sends
/// `data: {"response": {"candidates": [...]}}` lines.
pub(crate) fn normalize_cloudcode_frame(frame: &SseFrame) -> Vec<String> {
    if frame.data.is_empty() {
        return Vec::new();
    }
    if frame.data == DONE_SENTINEL {
        return vec![provider_done_frame()];
    }
    let Ok(value) = serde_json::from_str::<JsonValue>(&frame.data) else {
        return Vec::new();
    };
    let response = value.get("response").unwrap_or(&value);
    let Some(candidates) = response.get("candidates").and_then(|c| c.as_array()) else {
        return Vec::new();
    };

    let mut choices = Vec::new();
    for candidate in candidates {
        let text = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let finish_reason = candidate
            .get("finishReason")
            .and_then(|reason| reason.as_str())
            .map(|reason| match reason {
                "STOP" => "stop".to_string(),
                "MAX_TOKENS" => "length".to_string(),
                other => other.to_ascii_lowercase(),
            });
        if text.is_empty() && finish_reason.is_none() {
            continue;
        }
        choices.push(json!({
            "index": candidate.get("index").and_then(|index| index.as_i64()).unwrap_or(0),
            "delta": {"content": text},
            "finish_reason": finish_reason,
        }));
    }
    if choices.is_empty() {
        return Vec::new();
    }

    let chunk = json!({
        "id": "",
        "object": "chat.completion.chunk",
        "created": 0,
        "model": "",
        "choices": choices,
    });
    vec![provider_data_frame(&chunk.to_string())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloudcode_frames_become_pivot_chunks() {
        let frame = SseFrame {
            event: None,
            data: r#"{"response":{"candidates":[{"content":{"role":"model","parts":[{"text":"hel"},{"text":"lo"}]},"index":0}]}}"#
                .to_string(),
        };
        let lines = normalize_cloudcode_frame(&frame);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("event: provider.data\n"));
        assert!(lines[0].contains("\"content\":\"hello\""));
    }

    #[test]
    fn done_sentinel_maps_to_provider_done() {
        let frame = SseFrame {
            event: None,
            data: DONE_SENTINEL.to_string(),
        };
        let lines = normalize_cloudcode_frame(&frame);
        assert_eq!(lines, vec![provider_done_frame()]);
    }

    #[test]
    fn keepalive_and_garbage_frames_are_dropped() {
        let frame = SseFrame {
            event: None,
            data: "not json".to_string(),
        };
        assert!(normalize_cloudcode_frame(&frame).is_empty());
    }
}
