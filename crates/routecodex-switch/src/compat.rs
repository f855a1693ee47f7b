use serde_json::Value as JsonValue;

use crate::shape_filter::ShapeFilter;

/// Per-provider-family request adjustments applied after protocol switching
/// and before the provider builds the upstream body.
#[derive(Debug, Clone, Default)]
pub struct CompatOptions {
    /// Provider-family profile name (`glm`, `qwen`, `iflow`, `gemini`, …).
    pub profile: String,
    /// Optional declarative filter loaded from `shape-filters.<profile>.json`.
    pub shape_filter: Option<ShapeFilter>,
}

/// The three spellings of the output-token cap across the supported wire
/// protocols. Profiles keep exactly one and strip the rest.
const MAX_TOKEN_FIELDS: [&str; 3] = ["max_tokens", "maxTokens", "max_output_tokens"];

fn kept_max_token_field(profile: &str) -> &'static str {
    match profile {
        "gemini" | "geminicli" | "antigravity" => "max_output_tokens",
        _ => "max_tokens",
    }
}

pub fn apply_compatibility(body: &mut JsonValue, options: &CompatOptions) {
    let JsonValue::Object(_) = body else {
        return;
    };

    normalize_max_token_fields(body, kept_max_token_field(&options.profile));
    clean_tool_schemas(body);

    if let Some(filter) = &options.shape_filter {
        filter.apply(body);
    }
}

/// Collapse whichever max-token spellings are present into the profile's
/// canonical field, first value wins.
fn normalize_max_token_fields(body: &mut JsonValue, kept: &str) {
    let Some(map) = body.as_object_mut() else {
        return;
    };
    let mut value = None;
    for field in MAX_TOKEN_FIELDS {
        if let Some(found) = map.remove(field) {
            value.get_or_insert(found);
        }
    }
    if let Some(value) = value {
        map.insert(kept.to_string(), value);
    }
}

/// Tool-schema cleanup: upstreams reject `function.strict` and a
/// `tool_choice` that references no tools.
fn clean_tool_schemas(body: &mut JsonValue) {
    let Some(map) = body.as_object_mut() else {
        return;
    };

    let has_tools = map
        .get("tools")
        .and_then(|tools| tools.as_array())
        .is_some_and(|tools| !tools.is_empty());
    if !has_tools {
        map.remove("tool_choice");
        if map
            .get("tools")
            .is_some_and(|tools| tools.as_array().is_some_and(|items| items.is_empty()))
        {
            map.remove("tools");
        }
        return;
    }

    if let Some(tools) = map.get_mut("tools").and_then(|tools| tools.as_array_mut()) {
        for tool in tools {
            if let Some(function) = tool
                .get_mut("function")
                .and_then(|function| function.as_object_mut())
            {
                function.remove("strict");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gemini_profile_keeps_max_output_tokens() {
        let mut body = json!({"max_tokens": 100, "messages": []});
        apply_compatibility(
            &mut body,
            &CompatOptions {
                profile: "gemini".to_string(),
                shape_filter: None,
            },
        );
        assert_eq!(body["max_output_tokens"], 100);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn first_max_token_spelling_wins() {
        let mut body = json!({"max_tokens": 1, "max_output_tokens": 2});
        apply_compatibility(
            &mut body,
            &CompatOptions {
                profile: "glm".to_string(),
                shape_filter: None,
            },
        );
        assert_eq!(body["max_tokens"], 1);
        assert!(body.get("max_output_tokens").is_none());
    }

    #[test]
    fn tool_choice_dropped_without_tools_and_strict_stripped_with() {
        let mut body = json!({"tool_choice": "auto", "tools": []});
        apply_compatibility(&mut body, &CompatOptions::default());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("tools").is_none());

        let mut body = json!({
            "tool_choice": "auto",
            "tools": [{"type": "function", "function": {"name": "f", "strict": true}}]
        });
        apply_compatibility(&mut body, &CompatOptions::default());
        assert_eq!(body["tool_choice"], "auto");
        assert!(body["tools"][0]["function"].get("strict").is_none());
    }
}
