mod child;
mod client;
mod error;

pub use child::ChildChannel;
pub use client::WorkerClient;
pub use error::IpcError;
