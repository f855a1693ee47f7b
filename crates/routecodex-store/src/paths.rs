use std::path::PathBuf;

/// Root of the gateway's on-disk state. `ROUTECODEX_HOME` overrides the
/// default `~/.routecodex` (tests point it at a temp dir).
pub fn routecodex_home() -> PathBuf {
    if let Ok(value) = std::env::var("ROUTECODEX_HOME")
        && !value.trim().is_empty()
    {
        return PathBuf::from(value);
    }
    home_dir().join(".routecodex")
}

pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// `~/.routecodex/auth/<provider>/`: gateway-managed token files.
pub fn auth_dir(provider: &str) -> PathBuf {
    routecodex_home().join("auth").join(provider)
}

/// `~/.<provider>/oauth_creds.json`: vendor-CLI token file shared with the
/// vendor's own tooling.
pub fn vendor_creds_file(provider: &str) -> PathBuf {
    home_dir().join(format!(".{provider}")).join("oauth_creds.json")
}

/// `~/.routecodex/statics/`: daemon history and event log.
pub fn statics_dir() -> PathBuf {
    routecodex_home().join("statics")
}

pub fn history_file() -> PathBuf {
    statics_dir().join("token-daemon-history.json")
}

pub fn events_file() -> PathBuf {
    statics_dir().join("token-daemon-events.log")
}

/// `~/.routecodex/state/token-manager/leader.json`.
pub fn leader_file() -> PathBuf {
    routecodex_home()
        .join("state")
        .join("token-manager")
        .join("leader.json")
}

/// `~/.routecodex/codex-samples/<bucket>/`.
pub fn snapshot_dir(bucket: &str) -> PathBuf {
    routecodex_home().join("codex-samples").join(bucket)
}
