use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{StoreError, now_epoch_ms};

/// Consecutive auto-refresh failures before a token is auto-suspended.
pub const MAX_AUTO_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    Auto,
    Manual,
}

/// Result of one refresh attempt, as fed to `record_refresh_result`.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub success: bool,
    pub mode: RefreshMode,
    pub duration_ms: i64,
    pub error: Option<String>,
    /// Token-file mtime observed *after* the attempt.
    pub token_file_mtime: Option<i64>,
    /// Set by callers that know the credential is beyond saving
    /// (e.g. upstream said the refresh token is revoked).
    pub suspend_immediately: bool,
}

/// Per-token refresh aggregate.
///
/// Invariants enforced by `apply`: `refresh_successes + refresh_failures ==
/// total_attempts`; a success resets `failure_streak` and clears suspension;
/// `auto_suspended` is only set by an auto attempt that reached
/// `MAX_AUTO_FAILURES` with a known mtime, or asked for it explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenHistory {
    #[serde(default)]
    pub refresh_successes: u64,
    #[serde(default)]
    pub refresh_failures: u64,
    #[serde(default)]
    pub total_attempts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mode: Option<RefreshMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
    #[serde(default)]
    pub failure_streak: u32,
    #[serde(default)]
    pub auto_suspended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_token_mtime: Option<i64>,
}

impl TokenHistory {
    fn apply(&mut self, outcome: &RefreshOutcome, now_ms: i64) {
        self.total_attempts += 1;
        self.last_attempt_at = Some(now_ms);
        self.last_duration_ms = Some(outcome.duration_ms);
        self.last_mode = Some(outcome.mode);

        if outcome.success {
            self.refresh_successes += 1;
            self.last_result = Some("success".to_string());
            self.failure_streak = 0;
            self.auto_suspended = false;
            self.suspended_at = None;
            if outcome.token_file_mtime.is_some() {
                self.last_token_mtime = outcome.token_file_mtime;
            }
            return;
        }

        self.refresh_failures += 1;
        self.last_result = Some(
            outcome
                .error
                .clone()
                .unwrap_or_else(|| "failure".to_string()),
        );

        // Manual attempts never advance the streak: an operator poking at a
        // broken credential must not push it into suspension.
        if outcome.mode == RefreshMode::Manual {
            return;
        }

        self.failure_streak += 1;
        if outcome.token_file_mtime.is_some() {
            self.last_token_mtime = outcome.token_file_mtime;
        }
        let streak_exhausted =
            self.failure_streak >= MAX_AUTO_FAILURES && self.last_token_mtime.is_some();
        if (streak_exhausted || outcome.suspend_immediately) && !self.auto_suspended {
            self.auto_suspended = true;
            self.suspended_at = Some(now_ms);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalFile {
    version: u32,
    tokens: BTreeMap<String, TokenHistory>,
}

/// The on-disk history journal (`token-daemon-history.json`, version 1).
#[derive(Debug)]
pub struct HistoryJournal {
    path: PathBuf,
    tokens: BTreeMap<String, TokenHistory>,
}

impl HistoryJournal {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let tokens = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let file: JournalFile =
                    serde_json::from_slice(&raw).map_err(|err| StoreError::json(&path, err))?;
                file.tokens
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        Ok(Self { path, tokens })
    }

    pub fn get(&self, key: &str) -> Option<&TokenHistory> {
        self.tokens.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &TokenHistory)> {
        self.tokens.iter()
    }

    /// The single mutation point for token history.
    pub fn record_refresh_result(&mut self, key: &str, outcome: &RefreshOutcome) -> &TokenHistory {
        let entry = self.tokens.entry(key.to_string()).or_default();
        entry.apply(outcome, now_epoch_ms());
        entry
    }

    /// Whether the daemon should skip this token. A suspension is lifted
    /// in-place when the on-disk mtime has advanced past the one recorded at
    /// suspension time (the user re-authorized out of band).
    pub fn should_skip_auto(&mut self, key: &str, current_mtime: Option<i64>) -> bool {
        let Some(entry) = self.tokens.get_mut(key) else {
            return false;
        };
        if !entry.auto_suspended {
            return false;
        }
        if let (Some(current), Some(recorded)) = (current_mtime, entry.last_token_mtime)
            && current > recorded
        {
            entry.auto_suspended = false;
            entry.suspended_at = None;
            entry.failure_streak = 0;
            return false;
        }
        true
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        let file = JournalFile {
            version: 1,
            tokens: self.tokens.clone(),
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }
        let raw = serde_json::to_vec_pretty(&file).map_err(|err| StoreError::json(&self.path, err))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|err| StoreError::io(&tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StoreError::io(&self.path, err))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_failure(mtime: Option<i64>) -> RefreshOutcome {
        RefreshOutcome {
            success: false,
            mode: RefreshMode::Auto,
            duration_ms: 10,
            error: Some("invalid_grant".to_string()),
            token_file_mtime: mtime,
            suspend_immediately: false,
        }
    }

    fn success(mode: RefreshMode) -> RefreshOutcome {
        RefreshOutcome {
            success: true,
            mode,
            duration_ms: 5,
            error: None,
            token_file_mtime: Some(111),
            suspend_immediately: false,
        }
    }

    #[tokio::test]
    async fn attempts_are_monotone_and_balanced() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::load(dir.path().join("history.json"))
            .await
            .unwrap();
        journal.record_refresh_result("qwen:default", &success(RefreshMode::Auto));
        journal.record_refresh_result("qwen:default", &auto_failure(Some(1)));
        let entry = journal.get("qwen:default").unwrap();
        assert_eq!(
            entry.refresh_successes + entry.refresh_failures,
            entry.total_attempts
        );
        assert_eq!(entry.total_attempts, 2);
    }

    #[tokio::test]
    async fn three_auto_failures_with_known_mtime_suspend() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::load(dir.path().join("history.json"))
            .await
            .unwrap();
        for _ in 0..2 {
            journal.record_refresh_result("glm:default", &auto_failure(Some(50)));
        }
        assert!(!journal.get("glm:default").unwrap().auto_suspended);

        journal.record_refresh_result("glm:default", &auto_failure(Some(50)));
        let entry = journal.get("glm:default").unwrap();
        assert!(entry.auto_suspended);
        assert_eq!(entry.failure_streak, 3);
        assert!(journal.should_skip_auto("glm:default", Some(50)));
    }

    #[tokio::test]
    async fn unknown_mtime_never_suspends() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::load(dir.path().join("history.json"))
            .await
            .unwrap();
        for _ in 0..5 {
            journal.record_refresh_result("iflow:default", &auto_failure(None));
        }
        assert!(!journal.get("iflow:default").unwrap().auto_suspended);
    }

    #[tokio::test]
    async fn mtime_advance_or_manual_success_clears_suspension() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::load(dir.path().join("history.json"))
            .await
            .unwrap();
        for _ in 0..3 {
            journal.record_refresh_result("qwen:default", &auto_failure(Some(50)));
        }
        assert!(journal.should_skip_auto("qwen:default", Some(50)));

        // User re-authorized out of band: the file moved forward.
        assert!(!journal.should_skip_auto("qwen:default", Some(51)));
        assert!(!journal.get("qwen:default").unwrap().auto_suspended);

        for _ in 0..3 {
            journal.record_refresh_result("qwen:default", &auto_failure(Some(51)));
        }
        assert!(journal.get("qwen:default").unwrap().auto_suspended);
        journal.record_refresh_result("qwen:default", &success(RefreshMode::Manual));
        let entry = journal.get("qwen:default").unwrap();
        assert!(!entry.auto_suspended);
        assert_eq!(entry.failure_streak, 0);
    }

    #[tokio::test]
    async fn manual_failures_do_not_advance_streak() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = HistoryJournal::load(dir.path().join("history.json"))
            .await
            .unwrap();
        for _ in 0..5 {
            journal.record_refresh_result(
                "qwen:default",
                &RefreshOutcome {
                    mode: RefreshMode::Manual,
                    ..auto_failure(Some(9))
                },
            );
        }
        let entry = journal.get("qwen:default").unwrap();
        assert_eq!(entry.failure_streak, 0);
        assert!(!entry.auto_suspended);
    }

    #[tokio::test]
    async fn journal_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut journal = HistoryJournal::load(&path).await.unwrap();
        journal.record_refresh_result("qwen:default", &success(RefreshMode::Auto));
        journal.save().await.unwrap();

        let reloaded = HistoryJournal::load(&path).await.unwrap();
        assert_eq!(reloaded.get("qwen:default").unwrap().refresh_successes, 1);
    }
}
