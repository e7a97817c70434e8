use anyhow::Result;
use axum::routing::post;
use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::services::ServeDir;

mod chrome_logic;
use chrome_logic::{config, logger};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(&config.log_dir, &config.log_level)?;

    let chrome_config = config::load_chrome_config(&config)?;
    let chrome = lib_chrome::Chrome::provision(&chrome_config).await?;

    // The POST echo route backs the fetch-POST demo page; everything else is
    // static files from the document root.
    let app = Router::new()
        .route("/fetch_post.json", post(echo_body))
        .fallback_service(ServeDir::new(&config.root));
    let app = chrome.wrap(app);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("serving {} on {}", config.root.display(), addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    chrome.cleanup().await;
    log::info!("Shutdown complete.");
    Ok(())
}

async fn echo_body(body: String) -> String {
    body
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }
}
