mod error;
mod server;

use error::{Error, Result};
use runtime::{AgentConfig, AgentSession, AnthropicEngine, Engine, ToolServerManager};
use server::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "/home/user/agent_config.json";
const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("AGENT_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AgentConfig::load(&config_path)?;
    info!(agent = %config.name, model = %config.model, "loaded agent configuration");

    // Everything the chat endpoint needs is initialized before the listener
    // accepts traffic.
    let tools = Arc::new(ToolServerManager::start(&config.mcp_tools).await);
    info!(live = tools.servers().len(), "tool servers ready");

    let engine: Option<Arc<dyn Engine>> = match AnthropicEngine::from_env() {
        Some(engine) => Some(Arc::new(engine)),
        None => {
            warn!("no model credentials set, agent will echo messages");
            None
        }
    };

    let session = Arc::new(AgentSession::new(&config, tools.clone(), engine));
    info!(agent = %session.name(), engine = session.has_engine(), "agent initialized");

    let app = server::router(AppState {
        session: Some(session),
    });

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|source| Error::Bind {
        addr: addr.clone(),
        source,
    })?;
    info!(%addr, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tools.shutdown().await;
    info!("tool servers shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
