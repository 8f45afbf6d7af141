use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("could not spawn {program}: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("child process stdio is not piped")]
    MissingPipe,

    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("the channel to the child is closed")]
    ChannelClosed,

    #[error("no reply arrived in time")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, IpcError>;
