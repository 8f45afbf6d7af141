use thiserror::Error;

use crate::socket::SocketError;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("database error: {0}")]
    Db(#[from] riko_db::DbError),

    #[error("IPC error: {0}")]
    Ipc(#[from] riko_ipc::IpcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Socket(#[from] SocketError),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("no connection is live for this device")]
    NotConnected,

    #[error("timed out waiting for the close transition")]
    StopTimeout,

    #[error("destination is not registered on the network: {0}")]
    Unregistered(String),

    #[error("invalid command payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
