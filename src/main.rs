use clap::Parser;
use log::info;
use tasmota_gateway::config::GatewayConfig;
use tasmota_gateway::gateway::GatewayCore;
use tasmota_gateway::server;
use tasmota_gateway::store::MemoryStore;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    init_logger();
    info!("Starting Tasmota MQTT gateway");

    let config = GatewayConfig::parse();
    info!("Configuration loaded:");
    info!("  Bind: {}:{}", config.bind, config.port);
    info!("  Namespace: {}", config.namespace);
    info!(
        "  Authentication: {}",
        if config.username.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    info!("  Idle timeout: {}s", config.timeout);

    let (store, changes) = MemoryStore::new();
    let (events_tx, events_rx) = mpsc::channel(256);
    let shutdown = CancellationToken::new();

    let listener = match server::bind(&config).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let listener_task = tokio::spawn(server::run_listener(
        listener,
        config.clone(),
        events_tx,
        shutdown.clone(),
    ));

    let core = GatewayCore::new(config, store);
    let core_task = tokio::spawn(core.run(events_rx, changes, shutdown.clone()));

    info!("Gateway is running, press Ctrl+C to exit");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => log::error!("Failed to listen for shutdown signal: {e}"),
    }

    shutdown.cancel();
    let _ = listener_task.await;
    let _ = core_task.await;
    info!("Tasmota MQTT gateway stopped");
}
