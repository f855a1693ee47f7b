use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use routecodex_daemon::{DaemonConfig, RefreshDaemon};
use routecodex_store::token_file::{TokenPayload, write_token_file};
use routecodex_store::{HistoryJournal, now_epoch_ms, paths};

fn daemon_config(token_url: String) -> DaemonConfig {
    let mut config = DaemonConfig {
        providers: vec!["qwen".to_string()],
        tick_interval_secs: 1,
        workers: 2,
        ..Default::default()
    };
    config.oauth_token_urls.insert("qwen".to_string(), token_url);
    config
}

// Tests mutate ROUTECODEX_HOME; serialize them.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[tokio::test]
async fn three_failed_auto_refreshes_suspend_until_mtime_advances() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let server = MockServer::start().await;
    // The refresh grant is dead: a 4xx the retry loop treats as fatal.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        // Three ticks refresh once each; the fourth must not call at all.
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;

    let token_path = paths::auth_dir("qwen").join("default.json");
    write_token_file(
        &token_path,
        &TokenPayload {
            access_token: "stale".to_string(),
            refresh_token: Some("rt-dead".to_string()),
            expires_at: Some(now_epoch_ms() - 1_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let daemon = RefreshDaemon::new(daemon_config(format!("{}/token", server.uri())));

    for expected_streak in 1..=3u32 {
        let stats = daemon.tick().await.unwrap();
        assert_eq!(stats.failed, 1, "tick {expected_streak} should fail once");
        let journal = HistoryJournal::load(paths::history_file()).await.unwrap();
        let entry = journal.get("qwen:default").unwrap();
        assert_eq!(entry.failure_streak, expected_streak);
        assert_eq!(entry.auto_suspended, expected_streak >= 3);
        assert_eq!(
            entry.refresh_successes + entry.refresh_failures,
            entry.total_attempts
        );
    }

    // Fourth tick: the token is suspended and skipped entirely.
    let stats = daemon.tick().await.unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped_suspended, 1);
    server.verify().await;

    // The user re-authorizes out of band: the file mtime advances and the
    // next tick refreshes again.
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    write_token_file(
        &token_path,
        &TokenPayload {
            access_token: "reauthorized".to_string(),
            refresh_token: Some("rt-new".to_string()),
            expires_at: Some(now_epoch_ms() - 1_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh",
            "refresh_token": "rt-new",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let stats = daemon.tick().await.unwrap();
    assert_eq!(stats.skipped_suspended, 0);
    assert_eq!(stats.refreshed, 1);

    let journal = HistoryJournal::load(paths::history_file()).await.unwrap();
    let entry = journal.get("qwen:default").unwrap();
    assert!(!entry.auto_suspended);
    assert_eq!(entry.failure_streak, 0);
}

#[tokio::test]
async fn static_alias_and_fresh_tokens_are_left_alone() {
    let _env = ENV_LOCK.lock().unwrap();
    let home = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("ROUTECODEX_HOME", home.path()) };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "x", "expires_in": 3600
        })))
        .expect(0)
        .mount(&server)
        .await;

    // A read-only operator credential, expired on purpose.
    write_token_file(
        &paths::auth_dir("qwen").join("static.json"),
        &TokenPayload {
            access_token: "pinned".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(now_epoch_ms() - 1_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // A healthy token far from expiry.
    write_token_file(
        &paths::auth_dir("qwen").join("fresh.json"),
        &TokenPayload {
            access_token: "ok".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: Some(now_epoch_ms() + 3_600_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let daemon = RefreshDaemon::new(daemon_config(format!("{}/token", server.uri())));
    let stats = daemon.tick().await.unwrap();
    assert_eq!(stats.scanned, 2);
    assert_eq!(stats.refreshed, 0);
    assert_eq!(stats.failed, 0);
    server.verify().await;
}
