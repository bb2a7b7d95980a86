use nodeboot::{
    BootstrapController, BootstrapSettings, DaemonEvent, EventBus, JsonRpcClient, LogFormat,
    WalletSettings, init_tracing_with,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("no per-user data directory on this system"))?
        .join("reddwallet");

    // Optional wallet settings file, e.g. REDDWALLET_SETTINGS=~/.reddwallet/settings.json
    let wallet = match std::env::var_os("REDDWALLET_SETTINGS") {
        Some(path) => WalletSettings::load(&PathBuf::from(path))?,
        None => WalletSettings::default(),
    };

    let format = match std::env::var("NODEBOOT_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    init_tracing_with(wallet.debug, format);

    let binaries_root = std::env::var_os("REDDWALLET_DAEMONS")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("daemons"));
    let settings = BootstrapSettings::from_wallet(&wallet, app_data_dir)
        .binaries_root(binaries_root)
        .build()?;

    let events = EventBus::new();
    let mut subscriber = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = subscriber.recv().await {
            match event {
                DaemonEvent::Bootstrapped(result) => {
                    info!(code = result.code, message = %result.message, "Bootstrap finished")
                }
                DaemonEvent::Notification(kind) => info!(?kind, "Daemon notification"),
            }
        }
    });

    let controller = Arc::new(BootstrapController::new(
        settings,
        Arc::new(JsonRpcClient::new()?),
        events,
    )?);

    let result = controller.start_local().await;
    if !result.result {
        error!(code = result.code, "{}", result.message);
        std::process::exit(i32::from(result.code));
    }

    println!("reddcoind is ready, press Ctrl-C to stop it");
    tokio::signal::ctrl_c().await?;

    if let Some(termination) = controller.teardown() {
        let outcome = termination.await?;
        info!(?outcome, "Daemon signalled");
    }

    Ok(())
}
