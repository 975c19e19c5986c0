use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

mod app;
mod auth;
mod http;

/// Conversational meal-planning gateway.
#[derive(Parser)]
#[command(name = "kondate-gateway", version)]
struct Args {
    /// Path to kondate.toml (default: ~/.kondate/kondate.toml).
    #[arg(long)]
    config: Option<String>,
    /// Override the listen port from the config.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kondate_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    // Missing mandatory configuration aborts startup.
    let config = kondate_core::config::KondateConfig::load(args.config.as_deref())?;

    let bind = config.gateway.bind.clone();
    let port = args.port.unwrap_or(config.gateway.port);
    let state = Arc::new(app::AppState::from_config(config));
    let router = app::build_router(state.clone());

    spawn_eviction_sweeper(state.clone());

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("kondate gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Periodically evict idle sessions; any attached progress stream is
/// closed with a terminal error so subscribers do not hang.
fn spawn_eviction_sweeper(state: Arc<app::AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let evicted = state.store.evict_idle(chrono::Utc::now()).await;
            for session_id in evicted {
                warn!(session = %session_id, "session expired");
                state.pipeline.cancel_session(&session_id);
                state.hub.close_with(
                    &session_id,
                    kondate_protocol::ProgressEvent::error("SessionExpired"),
                );
            }
        }
    });
}
