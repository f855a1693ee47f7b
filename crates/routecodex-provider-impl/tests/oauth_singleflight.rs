use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use routecodex_provider_impl::oauth::{
    EnsureOptions, FlowPreference, OAuthEndpoints, ensure_valid_oauth_token,
};
use routecodex_store::now_epoch_ms;
use routecodex_store::token_file::{TokenPayload, write_token_file};

fn endpoints(token_url: String) -> OAuthEndpoints {
    OAuthEndpoints {
        device_urls: Vec::new(),
        auth_url: String::new(),
        token_url,
        client_id: "test-client".to_string(),
        client_secret: None,
        scope: "openid".to_string(),
        flow: FlowPreference::DeviceFirst,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ensure_calls_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(json!({
                    "access_token": "fresh",
                    "refresh_token": "rt",
                    "token_type": "Bearer",
                    "expires_in": 3600
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token.json");
    write_token_file(
        &token_path,
        &TokenPayload {
            access_token: "stale".to_string(),
            refresh_token: Some("rt".to_string()),
            // Inside the refresh buffer: every caller wants a refresh.
            expires_at: Some(now_epoch_ms() + 1_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let client = wreq::Client::new();
    let endpoints = endpoints(format!("{}/token", server.uri()));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        let endpoints = endpoints.clone();
        let token_path = token_path.clone();
        handles.push(tokio::spawn(async move {
            ensure_valid_oauth_token(&client, &endpoints, &token_path, EnsureOptions::default())
                .await
        }));
    }

    for handle in handles {
        let payload = handle.await.unwrap().unwrap();
        assert_eq!(payload.access_token, "fresh");
    }

    // expect(1) on the mock: exactly one upstream refresh happened.
    server.verify().await;
}
