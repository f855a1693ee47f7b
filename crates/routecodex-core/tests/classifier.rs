use std::collections::BTreeSet;

use serde_json::json;

use routecodex_core::classify::{ClassifyInput, classify};
use routecodex_core::config::ClassificationConfig;

fn base_config() -> ClassificationConfig {
    serde_json::from_value(json!({
        "protocol_mapping": {
            "openai-chat": {"endpoints": ["/v1/chat/completions"]},
            "openai-responses": {"endpoints": ["/v1/responses"], "message_field": "input"},
            "anthropic-messages": {"endpoints": ["/v1/messages"]},
            "gemini": {"endpoints": ["generateContent"], "message_field": "contents"}
        },
        "model_tiers": {
            "basic": {"models": ["glm-4-flash"], "max_tokens": 8192},
            "advanced": {"models": ["glm-4.6", "qwen-max"], "max_tokens": 32768}
        },
        "routing_decisions": {
            "default": {"model_tier": "basic", "priority": 0},
            "longContext": {"model_tier": "advanced", "token_threshold": 100000, "priority": 10}
        },
        "thinking_keywords": ["深入思考", "think harder"],
        "long_context_threshold_tokens": 100000,
        "confidence_threshold": 0.5
    }))
    .unwrap()
}

fn routes(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn glm_chat_lands_on_default_route_deterministically() {
    let config = base_config();
    let configured = routes(&["default"]);
    let request = json!({
        "model": "glm-4.6",
        "messages": [{"role": "user", "content": "hi"}]
    });
    let input = ClassifyInput {
        request: &request,
        endpoint: "/v1/chat/completions",
    };

    let first = classify(&config, &configured, &input);
    assert_eq!(first.route, "default");
    assert_eq!(first.model_tier, "advanced");
    assert!(first.analysis.token_analysis.total_tokens > 0);

    for _ in 0..5 {
        let again = classify(&config, &configured, &input);
        assert_eq!(again.route, first.route);
        assert_eq!(again.reasoning, first.reasoning);
        assert_eq!(
            again.analysis.token_analysis.total_tokens,
            first.analysis.token_analysis.total_tokens
        );
    }
}

#[test]
fn long_context_threshold_routes_to_long_context() {
    let config = base_config();
    let configured = routes(&["default", "longContext"]);
    // Comfortably above 100k tokens.
    let filler = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(20_000);
    let request = json!({
        "model": "glm-4.6",
        "messages": [{"role": "user", "content": filler}]
    });

    let classification = classify(
        &config,
        &configured,
        &ClassifyInput {
            request: &request,
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(classification.route, "longContext");
    assert!(classification.analysis.token_analysis.total_tokens >= 100_000);
}

#[test]
fn thinking_keyword_routes_to_thinking_route() {
    let config = base_config();
    let configured = routes(&["default", "thinking"]);
    let request = json!({
        "model": "glm-4.6",
        "messages": [{"role": "user", "content": "请深入思考这个问题"}]
    });

    let classification = classify(
        &config,
        &configured,
        &ClassifyInput {
            request: &request,
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(classification.route, "thinking");
}

#[test]
fn vision_outranks_long_context_and_tools() {
    let config = base_config();
    let configured = routes(&["default", "longContext", "thinking", "vision", "tools"]);
    let filler = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(20_000);
    let request = json!({
        "model": "glm-4.6",
        "messages": [
            {"role": "user", "content": [
                {"type": "text", "text": filler},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGk="}}
            ]}
        ],
        "tools": [{"type": "function", "function": {"name": "web_search"}}]
    });

    let classification = classify(
        &config,
        &configured,
        &ClassifyInput {
            request: &request,
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(classification.route, "vision");
}

#[test]
fn tool_categories_drive_coding_and_web_search_routes() {
    let config = base_config();
    let request_with_tool = |name: &str| {
        json!({
            "model": "glm-4.6",
            "messages": [{"role": "user", "content": "do it"}],
            "tools": [{"type": "function", "function": {"name": name}}]
        })
    };

    let coding = classify(
        &config,
        &routes(&["default", "coding", "webSearch", "tools"]),
        &ClassifyInput {
            request: &request_with_tool("execute_python"),
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(coding.route, "coding");

    let search = classify(
        &config,
        &routes(&["default", "webSearch", "tools"]),
        &ClassifyInput {
            request: &request_with_tool("web_search"),
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(search.route, "webSearch");

    let generic = classify(
        &config,
        &routes(&["default", "tools"]),
        &ClassifyInput {
            request: &request_with_tool("summon_unicorn"),
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(generic.route, "tools");
}

#[test]
fn unknown_endpoint_degrades_to_default() {
    let config = base_config();
    let configured = routes(&["default"]);
    let request = json!({"model": "m", "messages": []});

    let classification = classify(
        &config,
        &configured,
        &ClassifyInput {
            request: &request,
            endpoint: "/v9/unknown",
        },
    );
    assert_eq!(classification.route, "default");
    assert_eq!(classification.reasoning, "fallback:classification_error");
}

#[test]
fn unconfigured_routes_are_skipped_in_tree_order() {
    let config = base_config();
    // vision not configured: an image request flows to the next match.
    let configured = routes(&["default", "tools"]);
    let request = json!({
        "model": "glm-4.6",
        "messages": [
            {"role": "user", "content": [
                {"type": "image_url", "image_url": {"url": "data:x"}}
            ]}
        ],
        "tools": [{"type": "function", "function": {"name": "summon"}}]
    });

    let classification = classify(
        &config,
        &configured,
        &ClassifyInput {
            request: &request,
            endpoint: "/v1/chat/completions",
        },
    );
    assert_eq!(classification.route, "tools");
}

#[test]
fn gemini_contents_shape_is_understood() {
    let config = base_config();
    let configured = routes(&["default", "thinking"]);
    let request = json!({
        "contents": [
            {"role": "user", "parts": [{"text": "think harder about this"}]}
        ]
    });

    let classification = classify(
        &config,
        &configured,
        &ClassifyInput {
            request: &request,
            endpoint: "/v1beta/models/gemini-2.5-pro:generateContent",
        },
    );
    assert_eq!(classification.route, "thinking");
}
