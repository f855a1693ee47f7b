use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use routecodex_provider_impl::oauth::{
    EnsureOptions, OAuthEndpoints, ensure_valid_oauth_token, refresh_tokens_with_retry,
};
use routecodex_provider_impl::oauth_endpoints_for;
use routecodex_store::token_file::{read_token_file, token_file_mtime_ms, write_token_file};
use routecodex_store::{
    EventLog, HistoryJournal, LeaderLease, RefreshMode, RefreshOutcome, StoreError,
    TokenDescriptor, TokenStatus, now_epoch_ms, paths, scan_tokens,
};

pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Provider families whose token directories are scanned.
    pub providers: Vec<String>,
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-provider token endpoint overrides (self-hosted relays).
    #[serde(default)]
    pub oauth_token_urls: BTreeMap<String, String>,
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                "qwen".to_string(),
                "iflow".to_string(),
                "geminicli".to_string(),
                "antigravity".to_string(),
            ],
            tick_interval_secs: DEFAULT_TICK_SECS,
            workers: DEFAULT_WORKERS,
            oauth_token_urls: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub scanned: usize,
    pub refreshed: usize,
    pub failed: usize,
    pub skipped_suspended: usize,
}

/// The token refresh daemon: single leader, periodic scan, bounded
/// concurrent refresh, failure-streak auto-suspend.
pub struct RefreshDaemon {
    config: DaemonConfig,
    client: wreq::Client,
    events: EventLog,
}

impl RefreshDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            client: wreq::Client::new(),
            events: EventLog::new(paths::events_file()),
        }
    }

    fn endpoints_for(&self, provider: &str) -> Option<OAuthEndpoints> {
        let mut endpoints = oauth_endpoints_for(provider)?;
        if let Some(url) = self.config.oauth_token_urls.get(provider) {
            endpoints.token_url = url.clone();
        }
        Some(endpoints)
    }

    /// Claim leadership and loop forever. Returns only on a lost lease claim
    /// or a fatal store error.
    pub async fn run(&self) -> Result<(), StoreError> {
        let mut lease = LeaderLease::new(paths::leader_file(), format!("daemon-{}", std::process::id()));
        lease.claim().await?;
        info!(event = "daemon_started", tick_secs = self.config.tick_interval_secs);

        loop {
            match self.tick().await {
                Ok(stats) => {
                    info!(
                        event = "daemon_tick",
                        scanned = stats.scanned,
                        refreshed = stats.refreshed,
                        failed = stats.failed,
                        skipped_suspended = stats.skipped_suspended,
                    );
                }
                Err(err) => warn!(event = "daemon_tick_failed", error = %err),
            }
            tokio::time::sleep(Duration::from_secs(self.config.tick_interval_secs)).await;
        }
    }

    /// One scan-and-refresh pass. Public so the CLI can run a single tick
    /// and so tests can drive the loop deterministically.
    pub async fn tick(&self) -> Result<TickStats, StoreError> {
        let descriptors = scan_tokens(&self.config.providers).await?;
        let mut journal = HistoryJournal::load(paths::history_file()).await?;
        let mut stats = TickStats {
            scanned: descriptors.len(),
            ..Default::default()
        };

        let mut jobs = Vec::new();
        for descriptor in descriptors {
            if descriptor.is_static() || !descriptor.has_refresh_token {
                continue;
            }
            if !matches!(
                descriptor.state.status,
                TokenStatus::Expiring | TokenStatus::Expired
            ) {
                continue;
            }
            let key = descriptor.history_key();
            let mtime = token_file_mtime_ms(&descriptor.file_path).await;
            if journal.should_skip_auto(&key, mtime) {
                stats.skipped_suspended += 1;
                continue;
            }
            let Some(endpoints) = self.endpoints_for(&descriptor.provider) else {
                continue;
            };
            jobs.push((descriptor, endpoints));
        }

        // Bounded worker pool over the due tokens.
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut handles = Vec::new();
        for (descriptor, endpoints) in jobs {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore open");
            let client = self.client.clone();
            handles.push(tokio::spawn(async move {
                let outcome = refresh_one(&client, &endpoints, &descriptor).await;
                drop(permit);
                (descriptor, outcome)
            }));
        }

        for handle in handles {
            let Ok((descriptor, outcome)) = handle.await else {
                continue;
            };
            if outcome.success {
                stats.refreshed += 1;
            } else {
                stats.failed += 1;
            }
            let entry = journal.record_refresh_result(&descriptor.history_key(), &outcome);
            if entry.auto_suspended {
                warn!(
                    event = "token_auto_suspended",
                    provider = %descriptor.provider,
                    alias = %descriptor.alias,
                    failure_streak = entry.failure_streak,
                );
            }
            if let Err(err) = self
                .events
                .refresh_result(
                    outcome.success,
                    &descriptor.provider,
                    &descriptor.alias,
                    &descriptor.file_path.display().to_string(),
                    outcome.duration_ms,
                    "auto",
                    outcome.error.clone(),
                )
                .await
            {
                warn!(event = "daemon_event_log_failed", error = %err);
            }
        }

        journal.save().await?;
        Ok(stats)
    }
}

/// Refresh one token in auto mode; the outcome carries the file mtime
/// observed after the attempt, as the journal contract requires.
async fn refresh_one(
    client: &wreq::Client,
    endpoints: &OAuthEndpoints,
    descriptor: &TokenDescriptor,
) -> RefreshOutcome {
    let started = now_epoch_ms();
    let result = async {
        let payload = read_token_file(&descriptor.file_path)
            .await
            .map_err(|err| err.to_string())?;
        let refresh_token = payload
            .refresh_token
            .clone()
            .ok_or_else(|| "missing refresh_token".to_string())?;
        let refreshed =
            refresh_tokens_with_retry(client, endpoints, &refresh_token, Some(&payload))
                .await
                .map_err(|err| err.to_string())?;
        write_token_file(&descriptor.file_path, &refreshed)
            .await
            .map_err(|err| err.to_string())
    }
    .await;

    let mtime_after = token_file_mtime_ms(&descriptor.file_path).await;
    RefreshOutcome {
        success: result.is_ok(),
        mode: RefreshMode::Auto,
        duration_ms: now_epoch_ms() - started,
        error: result.err(),
        token_file_mtime: mtime_after,
        suspend_immediately: false,
    }
}

/// Operator-driven refresh for `oauth <selector>`. Always honors the
/// requested re-authorization, records history in manual mode, and never
/// touches the failure streak. `static` aliases are read-only.
///
/// Returns whether the refresh succeeded; journal/event bookkeeping happens
/// either way.
pub async fn manual_refresh(
    provider: &str,
    alias: &str,
    force_reauthorize: bool,
    oauth_token_urls: &BTreeMap<String, String>,
) -> Result<bool, StoreError> {
    if alias == "static" {
        info!(event = "manual_refresh_skipped_static", provider = %provider);
        return Ok(true);
    }
    let Some(mut endpoints) = oauth_endpoints_for(provider) else {
        warn!(event = "manual_refresh_no_oauth", provider = %provider);
        return Ok(false);
    };
    if let Some(url) = oauth_token_urls.get(provider) {
        endpoints.token_url = url.clone();
    }

    let token_path = paths::auth_dir(provider).join(format!("{alias}.json"));
    let client = wreq::Client::new();
    let started = now_epoch_ms();
    let result = ensure_valid_oauth_token(
        &client,
        &endpoints,
        &token_path,
        EnsureOptions {
            open_browser: true,
            force_reauthorize,
            force_reacquire_if_refresh_fails: true,
        },
    )
    .await;

    let mut journal = HistoryJournal::load(paths::history_file()).await?;
    let outcome = RefreshOutcome {
        success: result.is_ok(),
        mode: RefreshMode::Manual,
        duration_ms: now_epoch_ms() - started,
        error: result.as_ref().err().map(|err| err.to_string()),
        token_file_mtime: token_file_mtime_ms(&token_path).await,
        suspend_immediately: false,
    };
    journal.record_refresh_result(&format!("{provider}:{alias}"), &outcome);
    journal.save().await?;

    EventLog::new(paths::events_file())
        .refresh_result(
            outcome.success,
            provider,
            alias,
            &token_path.display().to_string(),
            outcome.duration_ms,
            "manual",
            outcome.error.clone(),
        )
        .await?;

    match result {
        Ok(_) => Ok(true),
        Err(err) => {
            warn!(event = "manual_refresh_failed", provider = %provider, alias = %alias, error = %err);
            Ok(false)
        }
    }
}
