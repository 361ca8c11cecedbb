use credit_manager::{AppConfig, CreditManagementApp};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();
    info!(api = %config.api_url, data_dir = %config.data_dir.display(), mock = config.mock_api, "starting credit-manager");

    let app = CreditManagementApp::from_config(config)?;
    let mut events = app.context().bus.stream();
    if let Err(err) = app.start().await {
        warn!("start failed, error screen shown: {err:#}");
    }
    match app.active_panel() {
        Some((tab, markup)) => info!(tab = %tab, bytes = markup.len(), "active panel\n{markup}"),
        None => match app.fatal_error() {
            Some(screen) => info!("error screen\n{screen}"),
            None => warn!("no tab on screen"),
        },
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => debug!(name = %event.name, source = ?event.source, "bus event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    app.shutdown();
    Ok(())
}
