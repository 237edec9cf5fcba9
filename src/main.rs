use color_eyre::{eyre::eyre, Result};
use homesync::auth::CredentialVerifier;
use homesync::config::AppConfig;
use homesync::mqtt::mqtt_handler::MqttHandler;
use homesync::sync::{Change, SyncCore, SyncEngineHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(&config_path).await?;
    info!("Using config {}", config_path.display());

    let login = CredentialVerifier::from_config(&config.credential);
    if login.is_enabled() {
        info!("Login gate accepts user {}", login.username());
    } else {
        warn!("No password hash configured, every login will be rejected");
    }

    let core = SyncCore::from_config(&config);
    let _change_log = core.on_change(|change| match change {
        Change::Field { field, value } => info!("{} = {}", field, value),
        Change::Signal { channel, active } => info!("{} visible: {}", channel, active),
    });

    let router = core
        .router()
        .map_err(|e| eyre!("Failed to build topic router: {}", e))?;
    let mut engine = SyncEngineHandle::new("homesync".to_string());
    let inbox = engine
        .start(router, Arc::clone(core.signals()), config.mqtt.channel_capacity)
        .map_err(|e| eyre!("Failed to start sync engine: {}", e))?;

    let handler = MqttHandler::new(config.mqtt.clone(), core.topics(), inbox)?;
    let mut status = handler.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            debug!(
                "MQTT {:?}, {} messages received",
                current.connection_state, current.messages_received
            );
        }
    });

    let cancel = CancellationToken::new();
    let mqtt_task = tokio::spawn(handler.run(cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;
    info!("Shutting down");

    // Timers go first so no expiry fires after the bus is gone.
    if let Err(e) = engine.shutdown().await {
        error!("Sync engine shutdown failed: {}", e);
    }
    cancel.cancel();
    match mqtt_task.await {
        Ok(Ok(())) => debug!("MQTT handler stopped"),
        Ok(Err(e)) => error!("MQTT handler failed: {}", e),
        Err(e) => error!("MQTT task panicked: {}", e),
    }
    core.shutdown();

    Ok(())
}

/// Environment defaults, error reports and the log subscriber.
fn setup() -> Result<()> {
    for (key, default) in [("RUST_LIB_BACKTRACE", "0"), ("RUST_LOG", "info")] {
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, default);
        }
    }
    color_eyre::install()?;

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
    Ok(())
}
