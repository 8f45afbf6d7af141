mod bridge;
mod dispatcher;
mod error;
mod media;
mod projector;
mod session;
mod socket;

pub use bridge::{BridgeConnector, find_bridge_dir};
pub use dispatcher::Dispatcher;
pub use error::WorkerError;
pub use projector::Projector;
pub use session::{SessionController, StartOutcome};
pub use socket::*;
