use async_trait::async_trait;
use serde_json::Value as JsonValue;

use routecodex_common::{VendorReport, env_keys};
use routecodex_provider_core::{
    PipelineConfig, Provider, ProviderError, ProviderReply, ProviderRequest, ProviderResult,
    ProviderStatus,
};

use super::upstream::UpstreamCore;

const PROVIDER_NAME: &str = "glm";
const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

pub struct GlmProvider {
    core: UpstreamCore,
}

impl GlmProvider {
    pub fn new(config: PipelineConfig, wire_model: String) -> ProviderResult<Self> {
        Ok(Self {
            core: UpstreamCore::new(PROVIDER_NAME, config, wire_model, DEFAULT_BASE_URL, None)?,
        })
    }
}

#[async_trait]
impl Provider for GlmProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn initialize(&self) -> ProviderResult<()> {
        self.core.mark_initialized();
        Ok(())
    }

    async fn send_request(&self, request: ProviderRequest) -> ProviderResult<ProviderReply> {
        let mut body = self.core.preprocess_flat_body(&request);
        shape_glm_body(&mut body);
        let timeout = self
            .core
            .resolve_timeout(Some(env_keys::GLM_HTTP_TIMEOUT_MS), None);
        self.core
            .send_json(&request, "/chat/completions", body, &[], timeout)
            .await
            .map_err(attach_business_report)
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

/// GLM accepts only `system|user|assistant` roles and string content.
/// Tool messages become user messages; content parts are flattened to text;
/// assistant tool calls are serialized into `[tool_call:<name>] <args>`
/// lines because the upstream rejects the structured field.
fn shape_glm_body(body: &mut JsonValue) {
    let Some(messages) = body
        .get_mut("messages")
        .and_then(|messages| messages.as_array_mut())
    else {
        return;
    };

    for message in messages {
        let Some(map) = message.as_object_mut() else {
            continue;
        };

        let role = map.get("role").and_then(|role| role.as_str()).unwrap_or("user");
        if !matches!(role, "system" | "user" | "assistant") {
            map.insert("role".to_string(), JsonValue::from("user"));
        }
        map.remove("tool_call_id");
        map.remove("name");

        let mut text = map
            .get("content")
            .map(flatten_content)
            .unwrap_or_default();
        if let Some(calls) = map.remove("tool_calls")
            && let Some(calls) = calls.as_array()
        {
            for call in calls {
                let name = call
                    .get("function")
                    .and_then(|function| function.get("name"))
                    .and_then(|name| name.as_str())
                    .unwrap_or_default();
                let args = call
                    .get("function")
                    .and_then(|function| function.get("arguments"))
                    .and_then(|args| args.as_str())
                    .unwrap_or("{}");
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!("[tool_call:{name}] {args}"));
            }
        }
        map.insert("content".to_string(), JsonValue::from(text));
    }
}

fn flatten_content(content: &JsonValue) -> String {
    match content {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// GLM business codes carried inside error bodies, mapped to operator hints.
fn business_hint(code: &str) -> Option<&'static str> {
    match code {
        "1210" => Some("request parameters invalid; check model name and message shape"),
        "1213" => Some("model does not exist or is not open to this account"),
        "1302" => Some("concurrency limit reached; lower parallel request count"),
        "1303" => Some("daily quota exhausted; wait for reset or upgrade the plan"),
        "1113" => Some("account in arrears; top up the balance"),
        _ => None,
    }
}

fn attach_business_report(err: ProviderError) -> ProviderError {
    let ProviderError::Http {
        status,
        message,
        body,
        report,
    } = err
    else {
        return err;
    };
    let code = body
        .as_ref()
        .and_then(|body| body.get("error"))
        .and_then(|error| error.get("code"))
        .and_then(|code| match code {
            JsonValue::String(code) => Some(code.clone()),
            JsonValue::Number(code) => Some(code.to_string()),
            _ => None,
        });
    let report = report.or_else(|| {
        code.as_deref().and_then(|code| {
            business_hint(code).map(|hint| VendorReport {
                code: code.to_string(),
                hint: hint.to_string(),
            })
        })
    });
    ProviderError::Http {
        status,
        message,
        body,
        report,
    }
}
