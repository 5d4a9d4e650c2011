use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tellus::config::{GitHubAuth, ServiceConfig};
use tellus::feedback::{LoggingReporter, ServiceReporter};
use tellus::git::RepoStore;
use tellus::github::OctocrabReporter;
use tellus::server::{AppState, build_router};
use tellus::terraform::TerraformRunner;
use tellus::worker::{Dispatcher, Pipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tellus=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env().context("loading configuration")?;
    tracing::debug!(?config, "Loaded configuration");

    let store = RepoStore::with_remote_base(&config.repository_root_directory, &config.remote_base)
        .with_context(|| {
            format!(
                "creating repository root {}",
                config.repository_root_directory.display()
            )
        })?;

    let runner = TerraformRunner::new(&config.terraform_binary)
        .with_leading_args(config.terraform_leading_args.clone())
        .with_timeout(config.command_timeout());

    let reporter = match config.github_auth()? {
        Some(GitHubAuth::App {
            app_id,
            installation_id,
            private_key,
        }) => {
            let pem = std::fs::read(&private_key).with_context(|| {
                format!("reading GitHub App private key {}", private_key.display())
            })?;
            tracing::info!(app_id, installation_id, "Authenticating as GitHub App installation");
            ServiceReporter::GitHub(
                OctocrabReporter::from_app(app_id, installation_id, &pem)
                    .context("building GitHub App client")?,
            )
        }
        Some(GitHubAuth::Token(token)) => ServiceReporter::GitHub(
            OctocrabReporter::from_token(token).context("building GitHub client")?,
        ),
        None => {
            tracing::warn!("No GitHub credentials configured, results will only be logged");
            ServiceReporter::DryRun(LoggingReporter)
        }
    };

    if config.webhook_secret().is_none() {
        tracing::warn!("No webhook secret configured, deliveries will not be verified");
    }

    let pipeline = Pipeline::new(Arc::new(store), runner, reporter);
    let dispatcher = Arc::new(Dispatcher::new(pipeline, config.queue_capacity));
    let app_state = AppState::new(
        Arc::clone(&dispatcher),
        config.webhook_secret().map(|s| s.as_bytes().to_vec()),
    );
    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.web_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    dispatcher.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
