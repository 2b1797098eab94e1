pub mod custom_resource;
pub mod ecr;
pub mod settings;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use custom_resource::models::{CompletionStatus, ResourceRequest};

/// Run the HTTP invocation endpoint until SIGINT/SIGTERM
pub async fn run_server(settings: settings::Settings) -> Result<()> {
    let state = AppState::from_settings(&settings).await?;
    let app = build_app(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Listening for custom resource invocations on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(custom_resource::routes::routes())
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Process one request document (file path or `-` for stdin) and print the delivered response
///
/// Returns whether the reported status was SUCCESS.
pub async fn handle_event(settings: settings::Settings, event: &str) -> Result<bool> {
    let raw = if event == "-" {
        let mut buf = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut buf)
            .await
            .context("Failed to read request from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(event)
            .await
            .with_context(|| format!("Failed to read request file {}", event))?
    };

    let request: ResourceRequest =
        serde_json::from_str(&raw).context("Failed to parse custom resource request")?;

    let handler = state::build_handler(&settings).await?;
    let response = handler.handle(request).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.status == CompletionStatus::Success)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Wait for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
