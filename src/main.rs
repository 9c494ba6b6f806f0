use anyhow::Result;
use peripheral_gateway::domain::settings::{GatewaySettings, SettingsService};
use peripheral_gateway::infrastructure::bluetooth::protocol::parse_address;
use peripheral_gateway::infrastructure::logging;
use tracing::info;

fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting peripheral gateway with settings from {}",
        settings_service.path().display()
    );
    parse_address(&settings.link.address)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(settings))
}

#[cfg(windows)]
async fn run(settings: GatewaySettings) -> Result<()> {
    use peripheral_gateway::infrastructure::bluetooth::{
        ConnectionConfig, ConnectionManager, WinRtLink,
    };
    use peripheral_gateway::infrastructure::sink::CaptureSink;
    use tracing::error;

    let link = WinRtLink::new(&settings.link);
    let sink = CaptureSink::new(&settings.capture);
    let mut manager = ConnectionManager::new(
        link,
        sink,
        ConnectionConfig::from_settings(&settings),
        settings.protocol,
    );

    manager
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("User stopped the connection");
        })
        .await;

    info!("Processed {} results", manager.sink().results());
    Ok(())
}

#[cfg(not(windows))]
async fn run(_settings: GatewaySettings) -> Result<()> {
    anyhow::bail!("No Bluetooth LE backend is available on this platform")
}
