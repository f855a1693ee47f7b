use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "routecodex", version, about = "Local reverse-proxy gateway for LLM APIs")]
pub(crate) struct Cli {
    /// Path to the gateway config file (JSON).
    #[arg(long, default_value = "routecodex.json")]
    pub(crate) config: String,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the gateway HTTP server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 5506)]
        port: u16,
    },
    /// Run the token refresh daemon in the foreground.
    Daemon,
    /// Show gateway configuration and daemon leadership.
    Status,
    /// List discovered tokens and their states.
    Tokens,
    /// List configured providers.
    Providers,
    /// Show the entry endpoints the gateway serves.
    Servers,
    /// Interactively refresh one token: `oauth <provider>` or
    /// `oauth <provider>/<alias>`.
    Oauth {
        selector: String,
        /// Discard the stored grant and run the full flow again.
        #[arg(long)]
        force: bool,
    },
    /// Validate the config and token files; non-zero exit on failure.
    Validate {
        /// `all` (default) or a `provider[/alias]` selector.
        selector: Option<String>,
    },
}

/// `provider` or `provider/alias`; alias defaults to `default`.
pub(crate) fn parse_selector(selector: &str) -> (String, String) {
    match selector.split_once('/') {
        Some((provider, alias)) => (provider.to_string(), alias.to_string()),
        None => (selector.to_string(), "default".to_string()),
    }
}
