use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use routecodex_core::RouterEngine;
use routecodex_core::config::RouterConfig;
use routecodex_router::gateway_router;
use routecodex_store::token_file::{TokenPayload, write_token_file};

// Tests mutate ROUTECODEX_HOME; serialize them.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

async fn spawn_gateway(config: RouterConfig) -> String {
    let engine = Arc::new(RouterEngine::new(config, "gateway-test").unwrap());
    let app = gateway_router(engine);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn chat_config(upstream: &str) -> RouterConfig {
    serde_json::from_value(json!({
        "classification": {
            "protocol_mapping": {
                "openai-chat": {"endpoints": ["/v1/chat/completions"]}
            },
            "routing_decisions": {"default": {"model_tier": "basic"}}
        },
        "route_pools": {
            "default": [{"provider_id": "glm", "model_id": "glm-4.6", "key_id": "k1"}]
        },
        "pipelines": {
            "glm.glm-4.6.k1": {
                "provider": {
                    "provider_type": "glm",
                    "base_url": upstream,
                    "auth": {"type": "apikey", "key": "secret"}
                },
                "protocols": {"input": "openai-chat", "output": "openai-chat"},
                "compatibility": {"profile": "glm"}
            }
        }
    }))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_completions_round_trip_and_error_envelope() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "model": "glm-4.6",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}]
        })))
        .mount(&upstream)
        .await;

    let gateway = spawn_gateway(chat_config(&upstream.uri())).await;
    let client = wreq::Client::new();

    // Happy path.
    let response = client
        .post(format!("{gateway}/v1/chat/completions"))
        .json(&json!({
            "model": "glm-4.6",
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["choices"][0]["message"]["content"], "pong");

    // Liveness.
    let response = client.get(format!("{gateway}/health")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Malformed JSON gets the structured envelope.
    let response = client
        .post(format!("{gateway}/v1/chat/completions"))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "config");
    assert!(body["error"]["message"].as_str().unwrap().contains("invalid json"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gemini_stream_endpoint_emits_sse() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let upstream = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"response\":{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]},\"index\":0}]}}\n\n",
        "data: {\"response\":{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\",\"index\":0}]}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1internal:streamGenerateContent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let token_path = home.path().join("geminicli-token.json");
    write_token_file(
        &token_path,
        &TokenPayload {
            access_token: "cloudcode-token".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(routecodex_store::now_epoch_ms() + 3_600_000),
            project_id: Some("companion-project".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let config: RouterConfig = serde_json::from_value(json!({
        "classification": {
            "protocol_mapping": {
                "gemini": {"endpoints": ["generateContent"], "message_field": "contents"}
            },
            "routing_decisions": {"default": {"model_tier": "basic"}}
        },
        "route_pools": {
            "default": [{"provider_id": "geminicli", "model_id": "gemini-2.5-pro", "key_id": "k1"}]
        },
        "pipelines": {
            "geminicli.gemini-2.5-pro.k1": {
                "provider": {
                    "provider_type": "geminicli",
                    "base_url": upstream.uri(),
                    "auth": {"type": "tokenfile", "path": token_path.to_str().unwrap()}
                },
                "protocols": {"input": "gemini", "output": "gemini"},
                "compatibility": {"profile": "geminicli"}
            }
        }
    }))
    .unwrap();

    let gateway = spawn_gateway(config).await;
    let client = wreq::Client::new();

    let response = client
        .post(format!(
            "{gateway}/v1beta/models/gemini-2.5-pro:streamGenerateContent"
        ))
        .json(&json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let body = response.text().await.unwrap();
    assert!(body.contains("Hel"));
    assert!(body.contains("lo"));
    assert!(body.contains("candidates"));
    upstream.verify().await;
}
