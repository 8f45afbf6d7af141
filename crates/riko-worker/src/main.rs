use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::{Context, Result, eyre};
use tokio::sync::mpsc;

use riko_core::{Envelope, notify};
use riko_db::{CredentialStore, Db};
use riko_worker::{BridgeConnector, Dispatcher, Projector, SessionController, find_bridge_dir};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .from_env_lossy()
                .add_directive("riko_worker=info".parse().unwrap())
                .add_directive("riko_ipc=info".parse().unwrap())
                .add_directive("riko_db=info".parse().unwrap()),
        )
        .init();

    let device_id = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: riko-workerd <device-id>"))?;

    // An unreachable database is a bootstrap failure: report it on the
    // channel and abort before any connection attempt.
    let db = match Db::new().await {
        Ok(db) => Arc::new(db),
        Err(error) => {
            let envelope =
                Envelope::fail(notify::DB_CONNECTION_ERROR, error.to_string());
            print!("{}", envelope.to_line());
            return Err(eyre!("database bootstrap failed: {error}"));
        }
    };

    let bridge_dir = find_bridge_dir().ok_or_else(|| {
        eyre!("could not find the protocol bridge directory (set RIKO_BRIDGE_DIR)")
    })?;
    tracing::info!(device_id = %device_id, bridge_dir = %bridge_dir.display(), "worker starting");

    let creds = CredentialStore::new(db.clone(), device_id.clone());
    let projector = Projector::new(db.clone(), device_id.clone(), media_dir()?);
    let connector = Arc::new(BridgeConnector::new(bridge_dir));

    let (notification_tx, notification_rx) = mpsc::channel(1000);
    let controller = SessionController::new(
        device_id,
        db,
        creds,
        connector,
        projector,
        notification_tx,
    );

    Dispatcher::new(controller)
        .run(notification_rx)
        .await
        .wrap_err("dispatcher failed")?;

    Ok(())
}

fn media_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("RIKO_MEDIA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let dirs = directories::ProjectDirs::from("dev", "riko", "riko")
        .ok_or_else(|| eyre!("could not resolve a data directory"))?;
    Ok(dirs.data_dir().join("media"))
}
