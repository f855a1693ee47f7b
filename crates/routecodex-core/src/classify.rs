use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::config::{ClassificationConfig, ProtocolMapping};
use crate::tokenize::{TokenAnalysis, analyze_tokens};

pub const FALLBACK_REASONING: &str = "fallback:classification_error";

#[derive(Debug, Clone)]
pub struct ClassifyInput<'a> {
    pub request: &'a JsonValue,
    pub endpoint: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolAnalysis {
    pub has_tools: bool,
    /// Categories present: `webSearch`, `codeExecution`, `fileSearch`,
    /// `dataAnalysis`, `general`.
    pub tool_types: Vec<String>,
}

impl ToolAnalysis {
    fn has(&self, category: &str) -> bool {
        self.tool_types.iter().any(|entry| entry == category)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Analysis {
    pub token_analysis: TokenAnalysis,
    pub tool_analysis: ToolAnalysis,
    pub model_tier_analysis: String,
}

/// Classifier output. `confidence` is diagnostic only; selection is fully
/// determined by the decision tree.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub route: String,
    pub model_tier: String,
    pub confidence: f64,
    pub reasoning: String,
    pub analysis: Analysis,
}

/// Deterministic request classification. Never fails: any internal error
/// degrades to the default route with a fallback reasoning marker.
pub fn classify(
    config: &ClassificationConfig,
    configured_routes: &BTreeSet<String>,
    input: &ClassifyInput<'_>,
) -> Classification {
    match classify_inner(config, configured_routes, input) {
        Some(classification) => classification,
        None => Classification {
            route: fallback_route(configured_routes),
            model_tier: "basic".to_string(),
            confidence: 0.0,
            reasoning: FALLBACK_REASONING.to_string(),
            analysis: Analysis::default(),
        },
    }
}

fn classify_inner(
    config: &ClassificationConfig,
    configured_routes: &BTreeSet<String>,
    input: &ClassifyInput<'_>,
) -> Option<Classification> {
    // 1. Protocol detect: first mapping with an endpoint fragment contained
    //    in the request path wins.
    let mapping = detect_protocol(config, input.endpoint)?;

    // 2. Accurate token analysis; an unavailable counter fails the whole
    //    classification rather than approximating.
    let texts = RequestTexts::extract(input.request, mapping);
    let tools_json = input
        .request
        .get(&mapping.tools_field)
        .map(|tools| tools.to_string())
        .unwrap_or_default();
    let token_analysis = analyze_tokens(&texts.message_text, &texts.system_text, &tools_json)?;

    // 3. Tool analysis.
    let tool_analysis = analyze_tools(input.request, mapping);

    // 4. Model tier.
    let model = input
        .request
        .get(&mapping.model_field)
        .and_then(|model| model.as_str())
        .unwrap_or_default();
    let model_tier = resolve_model_tier(config, model);

    // 5. Feature extraction.
    let has_image = texts.has_image;
    let thinking_intent = has_thinking_intent(config, &texts.user_text);

    // 6. Decision tree, first match wins; unconfigured routes are skipped.
    let configured = |route: &str| configured_routes.contains(route);
    let (route, confidence, reasoning) = if has_image && configured("vision") {
        ("vision", 0.9, "vision:image_content".to_string())
    } else if token_analysis.total_tokens >= config.long_context_threshold_tokens
        && configured("longContext")
    {
        (
            "longContext",
            0.85,
            format!(
                "longContext:tokens={}>={}",
                token_analysis.total_tokens, config.long_context_threshold_tokens
            ),
        )
    } else if thinking_intent && configured("thinking") {
        ("thinking", 0.8, "thinking:keyword_match".to_string())
    } else if (tool_analysis.has("codeExecution") || tool_analysis.has("fileSearch"))
        && configured("coding")
    {
        ("coding", 0.75, "coding:edit_tools".to_string())
    } else if tool_analysis.has("webSearch") && configured("webSearch") {
        ("webSearch", 0.75, "webSearch:search_tool".to_string())
    } else if tool_analysis.has_tools && configured("tools") {
        ("tools", 0.7, "tools:generic_tools".to_string())
    } else if configured("default") {
        ("default", 0.5, "default:no_rule_matched".to_string())
    } else {
        let route = fallback_route(configured_routes);
        debug!(event = "classify_no_default_route", chosen = %route);
        return Some(Classification {
            route,
            model_tier,
            confidence: 0.5,
            reasoning: "default:first_configured".to_string(),
            analysis: Analysis {
                token_analysis,
                tool_analysis,
                model_tier_analysis: model.to_string(),
            },
        });
    };

    Some(Classification {
        route: route.to_string(),
        model_tier,
        confidence,
        reasoning,
        analysis: Analysis {
            token_analysis,
            tool_analysis,
            model_tier_analysis: model.to_string(),
        },
    })
}

fn fallback_route(configured_routes: &BTreeSet<String>) -> String {
    if configured_routes.contains("default") {
        return "default".to_string();
    }
    configured_routes
        .iter()
        .next()
        .cloned()
        .unwrap_or_else(|| "default".to_string())
}

fn detect_protocol<'a>(
    config: &'a ClassificationConfig,
    endpoint: &str,
) -> Option<&'a ProtocolMapping> {
    config
        .protocol_mapping
        .values()
        .find(|mapping| {
            mapping
                .endpoints
                .iter()
                .any(|fragment| endpoint.contains(fragment.as_str()))
        })
}

fn resolve_model_tier(config: &ClassificationConfig, model: &str) -> String {
    if model.is_empty() {
        return "basic".to_string();
    }
    let matches = |models: &[String]| {
        models
            .iter()
            .any(|candidate| model.contains(candidate.as_str()))
    };
    if matches(&config.model_tiers.advanced.models) {
        "advanced".to_string()
    } else {
        // Unmatched models land in the basic tier.
        "basic".to_string()
    }
}

fn has_thinking_intent(config: &ClassificationConfig, user_text: &str) -> bool {
    if config.thinking_keywords.is_empty() || user_text.is_empty() {
        return false;
    }
    let haystack = user_text.to_lowercase();
    config
        .thinking_keywords
        .iter()
        .any(|keyword| haystack.contains(&keyword.to_lowercase()))
}

/// Collected request text plus the image flag, extracted shape-agnostically
/// across OpenAI messages, Anthropic blocks, and Gemini contents/parts.
#[derive(Debug, Default)]
struct RequestTexts {
    message_text: String,
    system_text: String,
    user_text: String,
    has_image: bool,
}

impl RequestTexts {
    fn extract(request: &JsonValue, mapping: &ProtocolMapping) -> Self {
        let mut out = Self::default();

        // Top-level system prompt (Anthropic `system`, Gemini
        // `systemInstruction`).
        for field in ["system", "systemInstruction", "system_instruction", "instructions"] {
            if let Some(value) = request.get(field) {
                push_text(&mut out.system_text, &collect_text(value));
            }
        }

        let messages = request
            .get(&mapping.message_field)
            .or_else(|| request.get("contents"))
            .or_else(|| request.get("input"))
            .and_then(|messages| messages.as_array());
        let Some(messages) = messages else {
            return out;
        };

        for message in messages {
            let role = message
                .get("role")
                .and_then(|role| role.as_str())
                .unwrap_or("user");
            let content = message
                .get("content")
                .or_else(|| message.get("parts"))
                .unwrap_or(&JsonValue::Null);
            let text = collect_text(content);
            if detect_image(content) {
                out.has_image = true;
            }
            match role {
                "system" | "developer" => push_text(&mut out.system_text, &text),
                "user" => {
                    push_text(&mut out.user_text, &text);
                    push_text(&mut out.message_text, &text);
                }
                _ => push_text(&mut out.message_text, &text),
            }
        }
        out
    }
}

fn push_text(buffer: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buffer.is_empty() {
        buffer.push('\n');
    }
    buffer.push_str(text);
}

fn collect_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        JsonValue::Object(map) => map
            .get("parts")
            .map(collect_text)
            .or_else(|| {
                map.get("text")
                    .and_then(|text| text.as_str())
                    .map(|text| text.to_string())
            })
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Image content: a part `type` containing "image", a populated
/// `image_url.url`, inline data with an image mime type, or an Anthropic
/// image source block.
fn detect_image(content: &JsonValue) -> bool {
    let JsonValue::Array(parts) = content else {
        return false;
    };
    parts.iter().any(|part| {
        let type_is_image = part
            .get("type")
            .and_then(|value| value.as_str())
            .is_some_and(|value| value.contains("image"));
        let has_image_url = part
            .get("image_url")
            .and_then(|value| value.get("url").or(Some(value)))
            .and_then(|value| value.as_str())
            .is_some_and(|url| !url.is_empty());
        let inline_image = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(|data| data.get("mimeType").or_else(|| data.get("mime_type")))
            .and_then(|mime| mime.as_str())
            .is_some_and(|mime| mime.starts_with("image"));
        type_is_image || has_image_url || inline_image
    })
}

const WEB_SEARCH_PATTERNS: [&str; 4] = ["web_search", "search", "browse", "google"];
const CODE_EXECUTION_PATTERNS: [&str; 5] = ["code", "execute", "python", "interpreter", "shell"];
const FILE_SEARCH_PATTERNS: [&str; 5] = ["file", "read", "write", "edit", "grep"];
const DATA_ANALYSIS_PATTERNS: [&str; 4] = ["data", "sql", "query", "analy"];

fn analyze_tools(request: &JsonValue, mapping: &ProtocolMapping) -> ToolAnalysis {
    let mut names = Vec::new();

    if let Some(tools) = request.get(&mapping.tools_field).and_then(|tools| tools.as_array()) {
        for tool in tools {
            let name = tool
                .get("function")
                .and_then(|function| function.get("name"))
                .or_else(|| tool.get("name"))
                .or_else(|| tool.get("type"))
                .and_then(|name| name.as_str())
                .unwrap_or_default();
            let description = tool
                .get("function")
                .and_then(|function| function.get("description"))
                .or_else(|| tool.get("description"))
                .and_then(|description| description.as_str())
                .unwrap_or_default();
            names.push(format!("{name} {description}").to_lowercase());
        }
    }

    // Tool-call parts inside messages count as tool usage too.
    if let Some(messages) = request
        .get(&mapping.message_field)
        .and_then(|messages| messages.as_array())
    {
        for message in messages {
            if let Some(calls) = message.get("tool_calls").and_then(|calls| calls.as_array()) {
                for call in calls {
                    if let Some(name) = call
                        .get("function")
                        .and_then(|function| function.get("name"))
                        .and_then(|name| name.as_str())
                    {
                        names.push(name.to_lowercase());
                    }
                }
            }
        }
    }

    if names.is_empty() {
        return ToolAnalysis::default();
    }

    let mut categories = BTreeSet::new();
    for name in &names {
        if WEB_SEARCH_PATTERNS.iter().any(|pattern| name.contains(pattern)) {
            categories.insert("webSearch");
        } else if CODE_EXECUTION_PATTERNS.iter().any(|pattern| name.contains(pattern)) {
            categories.insert("codeExecution");
        } else if FILE_SEARCH_PATTERNS.iter().any(|pattern| name.contains(pattern)) {
            categories.insert("fileSearch");
        } else if DATA_ANALYSIS_PATTERNS.iter().any(|pattern| name.contains(pattern)) {
            categories.insert("dataAnalysis");
        } else {
            categories.insert("general");
        }
    }

    ToolAnalysis {
        has_tools: true,
        tool_types: categories.into_iter().map(|entry| entry.to_string()).collect(),
    }
}
