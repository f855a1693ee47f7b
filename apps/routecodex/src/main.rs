use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod cli;
mod config_file;

use cli::{Cli, Command, parse_selector};

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[tokio::main]
async fn main() -> Result<()> {
    // The debug-center switch turns on full-detail tracing without touching
    // RUST_LOG.
    let default_filter = if std::env::var("ROUTECODEX_ENABLE_DEBUGCENTER").is_ok_and(|v| v == "1") {
        "debug"
    } else {
        "routecodex=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { host, port } => serve(&cli.config, &host, port).await,
        Command::Daemon => daemon(&cli.config).await,
        Command::Status => status(&cli.config).await,
        Command::Tokens => tokens(&cli.config).await,
        Command::Providers => providers(&cli.config),
        Command::Servers => servers(&cli.config),
        Command::Oauth { selector, force } => oauth(&cli.config, &selector, force).await,
        Command::Validate { selector } => validate(&cli.config, selector.as_deref()).await,
    }
}

async fn serve(config_path: &str, host: &str, port: u16) -> Result<()> {
    let config = config_file::load(config_path)?;
    let runtime_key = format!("serve-{}", std::process::id());
    let engine = Arc::new(routecodex_core::RouterEngine::new(config.router, runtime_key)?);
    let app = routecodex_router::gateway_router(engine.clone());

    let bind = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(event = "gateway_listening", bind = %bind);
    println!("listening on {bind}");
    axum::serve(listener, app).await?;
    engine.shutdown().await;
    Ok(())
}

async fn daemon(config_path: &str) -> Result<()> {
    let config = config_file::load(config_path)?;
    let daemon = routecodex_daemon::RefreshDaemon::new(config.daemon);
    daemon.run().await?;
    Ok(())
}

async fn status(config_path: &str) -> Result<()> {
    let config = config_file::load(config_path)?;
    println!("routes:");
    for (route, targets) in &config.router.route_pools {
        println!("  {route}: {} target(s)", targets.len());
        for target in targets {
            println!("    {}", target.key());
        }
    }

    let leader_path = routecodex_store::paths::leader_file();
    match std::fs::read_to_string(&leader_path) {
        Ok(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(lease) => println!(
                "daemon leader: pid {} (since {})",
                lease["pid"], lease["started_at"]
            ),
            Err(_) => println!("daemon leader: unreadable lease file"),
        },
        Err(_) => println!("daemon leader: none"),
    }
    Ok(())
}

async fn tokens(config_path: &str) -> Result<()> {
    let config = config_file::load(config_path)?;
    let descriptors = routecodex_store::scan_tokens(&config.daemon.providers).await?;
    if descriptors.is_empty() {
        println!("no tokens found");
        return Ok(());
    }
    for descriptor in descriptors {
        let expiry = descriptor
            .state
            .ms_until_expiry
            .map(|ms| format!("{}s", ms / 1000))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:30} {:10} expires_in={} refresh={} {}",
            descriptor.display_name,
            format!("{:?}", descriptor.state.status).to_lowercase(),
            expiry,
            descriptor.has_refresh_token,
            descriptor.file_path.display(),
        );
    }
    Ok(())
}

fn providers(config_path: &str) -> Result<()> {
    let config = config_file::load(config_path)?;
    for (key, pipeline) in &config.router.pipelines {
        println!(
            "{:30} type={:12} base={}",
            key,
            pipeline.provider.provider_type,
            pipeline
                .provider
                .base_url
                .as_deref()
                .unwrap_or("(default)"),
        );
    }
    Ok(())
}

fn servers(config_path: &str) -> Result<()> {
    // Config load validates; the entry surface itself is fixed.
    let _ = config_file::load(config_path)?;
    println!("POST /v1/chat/completions   (openai chat)");
    println!("POST /v1/responses          (openai responses)");
    println!("POST /v1/messages           (anthropic messages)");
    println!("POST /v1beta/models/{{model}}:generateContent");
    println!("POST /v1beta/models/{{model}}:streamGenerateContent");
    println!("GET  /health");
    Ok(())
}

async fn oauth(config_path: &str, selector: &str, force: bool) -> Result<()> {
    let config = config_file::load(config_path)?;
    let (provider, alias) = parse_selector(selector);
    let ok = routecodex_daemon::manual_refresh(
        &provider,
        &alias,
        force,
        &config.daemon.oauth_token_urls,
    )
    .await?;
    if ok {
        println!("{provider}/{alias}: token refreshed");
        Ok(())
    } else {
        eprintln!("{RED}{provider}/{alias}: refresh failed{RESET}");
        std::process::exit(1);
    }
}

async fn validate(config_path: &str, selector: Option<&str>) -> Result<()> {
    let config = match config_file::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{RED}config invalid: {err}{RESET}");
            std::process::exit(1);
        }
    };

    let wanted = selector.filter(|value| *value != "all").map(parse_selector);
    let descriptors = routecodex_store::scan_tokens(&config.daemon.providers).await?;
    let mut failures = 0usize;
    for descriptor in &descriptors {
        if let Some((provider, alias)) = &wanted
            && (&descriptor.provider != provider || &descriptor.alias != alias)
        {
            continue;
        }
        match descriptor.state.status {
            routecodex_store::TokenStatus::Invalid | routecodex_store::TokenStatus::Expired => {
                eprintln!(
                    "{RED}{}: {:?}{RESET}",
                    descriptor.display_name, descriptor.state.status
                );
                failures += 1;
            }
            _ => println!("{}: ok", descriptor.display_name),
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    println!("config ok, {} token(s) checked", descriptors.len());
    Ok(())
}
