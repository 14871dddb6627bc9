use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use octocrab::models::AppId;
use secrecy::SecretVec;
use tracing_subscriber::EnvFilter;

use ci_labeler::bot::create_router;
use ci_labeler::config::BotConfig;
use ci_labeler::github::api::{GithubAppClient, ResponseCache, DEFAULT_CACHE_CAPACITY};
use ci_labeler::github::server::{create_app, ServerState};
use ci_labeler::github::WebhookSecret;

#[derive(clap::Parser)]
struct Opts {
    /// Secret used to authenticate webhooks.
    /// If it is not set, webhook signatures are not verified.
    #[arg(long, env = "GITHUB_SECRET")]
    webhook_secret: Option<String>,

    /// Port on which the webhook server listens.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Github App ID.
    #[arg(long, env = "APP_ID")]
    app_id: u64,

    /// Private key used to authenticate as a Github App.
    #[arg(long, env = "PRIVATE_KEY")]
    private_key: String,

    /// How long to wait (in milliseconds) before handling a webhook, so that GitHub can
    /// reach internal consistency.
    #[arg(long, env = "CONSISTENCY_DELAY_MS", default_value_t = 1000)]
    consistency_delay_ms: u64,
}

async fn server(state: ServerState, port: u16) -> anyhow::Result<()> {
    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind to {addr}"))?;

    tracing::info!("Listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn try_main(opts: Opts) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot build tokio runtime")?;

    let cache = Arc::new(ResponseCache::new(DEFAULT_CACHE_CAPACITY));
    let clients = runtime.block_on(GithubAppClient::load(
        AppId(opts.app_id),
        SecretVec::new(opts.private_key.into_bytes()),
        cache,
    ))?;

    let config = BotConfig {
        consistency_delay: Duration::from_millis(opts.consistency_delay_ms),
        ..BotConfig::default()
    };
    let webhook_secret = opts.webhook_secret.map(WebhookSecret::new);
    if webhook_secret.is_none() {
        tracing::warn!("No webhook secret configured, webhook signatures will not be verified");
    }

    let state = ServerState::new(
        create_router(&config),
        Arc::new(clients),
        webhook_secret,
        config,
    );
    runtime.block_on(server(state, opts.port))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    if let Err(error) = try_main(opts) {
        eprintln!("Error: {error:?}");
        std::process::exit(1);
    }
}
