use anyhow::Context;
use serde::{Deserialize, Serialize};

use routecodex_core::config::RouterConfig;
use routecodex_daemon::DaemonConfig;

/// Top-level config file: router table plus daemon settings. The loader
/// only deserializes into the typed structs and runs the router's own
/// validation, no layering or merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AppConfig {
    pub(crate) router: RouterConfig,
    #[serde(default)]
    pub(crate) daemon: DaemonConfig,
}

pub(crate) fn load(path: &str) -> anyhow::Result<AppConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {path}"))?;
    let config: AppConfig =
        serde_json::from_str(&raw).with_context(|| format!("malformed config file {path}"))?;
    config
        .router
        .validate()
        .map_err(|err| anyhow::anyhow!("invalid router config: {err}"))?;
    Ok(config)
}
