use anyhow::{Context, Result};
use tracing::info;

use image_gallery::{config::AppConfig, logging, web_pages};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logger();

    let config = AppConfig::from_env();
    let state = web_pages::AppState::from_config(&config);
    state
        .library
        .ensure_layout()
        .await
        .context("creating image directories failed")?;

    let router = web_pages::router(state, config.max_upload_bytes);
    let tcp_listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {} failed", config.bind_address))?;

    info!(
        dataset = %config.dataset_dir.display(),
        uploads = %config.uploads_dir.display(),
        "image gallery started at http://{}",
        config.bind_address
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
