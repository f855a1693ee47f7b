use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use routecodex_common::EntryEndpoint;
use routecodex_core::engine::{EngineOutput, RouterEngine};
use routecodex_core::config::RouterConfig;
use routecodex_protocol::Proto;

fn router_config(base_url: &str) -> RouterConfig {
    serde_json::from_value(json!({
        "classification": {
            "protocol_mapping": {
                "openai-chat": {"endpoints": ["/v1/chat/completions"]},
                "anthropic-messages": {"endpoints": ["/v1/messages"]}
            },
            "model_tiers": {
                "basic": {"models": []},
                "advanced": {"models": ["glm-4.6"]}
            },
            "routing_decisions": {"default": {"model_tier": "basic"}},
            "thinking_keywords": [],
            "long_context_threshold_tokens": 100000
        },
        "route_pools": {
            "default": [{"provider_id": "glm", "model_id": "glm-4.6", "key_id": "k1"}]
        },
        "pipelines": {
            "glm.glm-4.6.k1": {
                "provider": {
                    "provider_type": "glm",
                    "base_url": base_url,
                    "auth": {"type": "apikey", "key": "k1-secret"}
                },
                "model": {"max_tokens": 8192},
                "protocols": {"input": "openai-chat", "output": "openai-chat"},
                "compatibility": {"profile": "glm"}
            }
        }
    }))
    .unwrap()
}

// Tests mutate ROUTECODEX_HOME; serialize them.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[tokio::test]
async fn glm_default_route_end_to_end() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "glm-4.6"})))
        .respond_with(|request: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            // The upstream body has the stream flag removed, roles
            // normalized to plain strings, and no caller metadata.
            assert!(body.get("stream").is_none());
            assert!(body.get("metadata").is_none());
            assert_eq!(body["messages"][0]["role"], "user");
            assert_eq!(body["messages"][0]["content"], "hi");
            ResponseTemplate::new(200).set_body_json(json!({
                "id": "cmpl-glm-1",
                "object": "chat.completion",
                "model": "glm-4.6",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "hello there"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
            }))
        })
        .expect(1)
        .mount(&server)
        .await;

    let engine = RouterEngine::new(router_config(&server.uri()), "test-runtime").unwrap();

    let reply = engine
        .handle(
            Proto::OpenaiChat,
            EntryEndpoint::OpenaiChat,
            "/v1/chat/completions",
            json!({
                "model": "glm-4.6",
                "stream": false,
                "metadata": {"user_supplied": true},
                "messages": [{"role": "user", "content": "hi"}]
            }),
            None,
            false,
            None,
        )
        .await
        .unwrap();

    assert_eq!(reply.route, "default");
    assert_eq!(reply.target.provider_id, "glm");
    assert_eq!(reply.target.key_id, "k1");
    let EngineOutput::Json(body) = reply.output else {
        panic!("expected json output");
    };
    assert_eq!(body["choices"][0]["message"]["content"], "hello there");
    assert_eq!(body["model"], "glm-4.6");
    server.verify().await;

    // The provider recorded the exchange under the entry bucket: a request
    // snapshot, a response snapshot, and the combined pair.
    let bucket_dir = home.path().join("codex-samples").join("openai-chat");
    let mut names: Vec<String> = std::fs::read_dir(&bucket_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert!(names.iter().any(|name| name.ends_with("_provider-request.json")));
    assert!(names.iter().any(|name| name.ends_with("_provider-response.json")));
    let pair_name = names
        .iter()
        .find(|name| name.ends_with("_provider-pair.json"))
        .expect("pair snapshot written");
    let pair: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(bucket_dir.join(pair_name)).unwrap())
            .unwrap();
    assert_eq!(pair["request"]["model"], "glm-4.6");
    assert_eq!(pair["response"]["choices"][0]["message"]["content"], "hello there");
}

#[tokio::test]
async fn anthropic_entry_is_translated_to_openai_provider_and_back() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-2",
            "object": "chat.completion",
            "model": "glm-4.6",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "bonjour"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = RouterEngine::new(router_config(&server.uri()), "test-runtime").unwrap();

    let reply = engine
        .handle(
            Proto::AnthropicMessages,
            EntryEndpoint::AnthropicMessages,
            "/v1/messages",
            json!({
                "model": "glm-4.6",
                "max_tokens": 64,
                "messages": [{"role": "user", "content": "salut"}]
            }),
            None,
            false,
            None,
        )
        .await
        .unwrap();

    let EngineOutput::Json(body) = reply.output else {
        panic!("expected json output");
    };
    // Entry-protocol response shape: Anthropic content blocks.
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "bonjour");
    assert_eq!(body["usage"]["input_tokens"], 4);
    server.verify().await;
}
