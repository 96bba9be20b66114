//! Startup helpers for the assistant server.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use crate::llm::OllamaGenerator;
use crate::server::{self, AppState, ServerConfig};

/// Install the global tracing subscriber (`RUST_LOG` aware, `INFO` default).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Run the server (used by the `scriptdesk-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();

    tracing::info!("Starting Scriptdesk assistant v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    tracing::info!("Ollama endpoint: {}", config.ollama_url);
    tracing::info!("Database: {}", config.sqlite_path.display());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    let port = config.port;
    let state = match rt.block_on(initialize(config)) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(state, port, shutdown_signal())) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub async fn initialize(
    config: ServerConfig,
) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    let ollama = OllamaGenerator::new(config.ollama_settings())
        .map_err(|e| format!("Failed to create Ollama client: {e}"))?;
    if !ollama.is_ready().await {
        tracing::warn!(
            "Ollama is not reachable at {}; chat requests will fail until it is",
            config.ollama_url
        );
    }
    tracing::info!(model = %config.model, "generator configured");
    AppState::open(config).await
}

/// Resolves on Ctrl-C.
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    }
}
