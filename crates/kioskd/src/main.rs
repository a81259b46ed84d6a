use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod admin;
mod api;
mod attended;
mod config;
mod engine;
mod pipeline;
mod recorder;
mod registry;
mod report;
mod settings;
mod state;
mod streams;

use kiosk_core::{CascadeLocator, FaceLocator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("kioskd starting");

    let config = config::Config::from_env();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        model = %config.model_path.display(),
        listen = %config.listen_addr,
        "configuration loaded"
    );

    let today = chrono::Local::now().date_naive();
    let kiosk = Arc::new(state::Kiosk::open(&config, today).context("failed to open kiosk state")?);

    let model_path = config.model_path.to_string_lossy().into_owned();
    let engine = engine::spawn_engine(
        move || CascadeLocator::load(&model_path).map(|l| Box::new(l) as Box<dyn FaceLocator>),
        Arc::clone(&kiosk),
    )
    .context("failed to start face engine")?;

    let settings = kiosk.settings.current();
    tracing::info!(
        employees = kiosk.registry().len(),
        cameras = settings.cameras.len(),
        late_time = %settings::format_time(settings.late_cutoff),
        operating_hours = %settings.window_label(),
        "state loaded"
    );

    let app = api::router(Arc::new(api::AppState { kiosk, engine }));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(addr = %config.listen_addr, "kioskd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("kioskd shutting down");
    Ok(())
}
