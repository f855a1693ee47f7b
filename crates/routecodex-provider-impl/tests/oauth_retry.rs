use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use routecodex_common::EntryEndpoint;
use routecodex_provider_core::{PipelineConfig, Provider, ProviderReply, ProviderRequest};
use routecodex_provider_impl::create_provider;
use routecodex_store::token_file::{TokenPayload, read_token_file, write_token_file};

fn pipeline_config(base_url: &str, token_url: &str, token_path: &str) -> PipelineConfig {
    let mut extensions = serde_json::Map::new();
    extensions.insert("oauth_token_url".to_string(), json!(token_url));
    serde_json::from_value(json!({
        "provider": {
            "provider_type": "qwen",
            "base_url": base_url,
            "auth": {"type": "tokenfile", "path": token_path},
            "extensions": extensions,
        },
        "model": {},
        "protocols": {"input": "openai-chat", "output": "openai-chat"},
        "compatibility": {"profile": "qwen"}
    }))
    .unwrap()
}

fn chat_request() -> ProviderRequest {
    ProviderRequest {
        body: json!({
            "model": "qwen-max",
            "messages": [{"role": "user", "content": "hi"}]
        }),
        entry_endpoint: EntryEndpoint::OpenaiChat,
        request_id: "req-test-1".to_string(),
        orig_model: "qwen-max".to_string(),
        wants_stream: false,
        session_id: None,
    }
}

// Tests mutate ROUTECODEX_HOME; serialize them.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[tokio::test]
async fn upstream_401_invalid_token_refreshes_and_retries_exactly_once() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    // Snapshots and auth paths stay inside the test sandbox.
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let server = MockServer::start().await;

    // First chat call is rejected with an invalid-token body.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"code": "invalid_token", "message": "expired"}})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    // The refresh grant succeeds.
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-token",
            "refresh_token": "rt-2",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    // The retried chat call succeeds.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "model": "qwen-max",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let token_path = home.path().join("qwen-default.json");
    write_token_file(
        &token_path,
        &TokenPayload {
            access_token: "stale-token".to_string(),
            refresh_token: Some("rt-1".to_string()),
            // Not yet expired by the clock, but the upstream disagrees.
            expires_at: Some(routecodex_store::now_epoch_ms() + 3_600_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let config = pipeline_config(
        &server.uri(),
        &format!("{}/oauth/token", server.uri()),
        token_path.to_str().unwrap(),
    );
    let provider = create_provider(&config, "qwen-max").unwrap();

    let reply = provider.send_request(chat_request()).await.unwrap();
    let ProviderReply::Json(response) = reply else {
        panic!("expected json reply");
    };
    assert_eq!(response.status, 200);
    assert_eq!(response.data["choices"][0]["message"]["content"], "hello");
    assert_eq!(response.metadata.model, "qwen-max");

    // The refreshed token was persisted for the next caller.
    let persisted = read_token_file(&token_path).await.unwrap();
    assert_eq!(persisted.access_token, "fresh-token");

    // Mock expectations assert: two chat POSTs, one refresh.
    server.verify().await;
}

#[tokio::test]
async fn non_retryable_4xx_surfaces_structured_error() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": {"message": "bad shape", "code": "1210"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let token_path = home.path().join("qwen.json");
    write_token_file(
        &token_path,
        &TokenPayload {
            access_token: "token".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let config = pipeline_config(
        &server.uri(),
        &format!("{}/oauth/token", server.uri()),
        token_path.to_str().unwrap(),
    );
    let provider = create_provider(&config, "qwen-max").unwrap();

    let err = provider.send_request(chat_request()).await.unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert!(!err.retryable());
    server.verify().await;
}
