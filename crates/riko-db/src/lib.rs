mod codec;
mod creds;
mod error;
mod models;
mod repository;
mod schema;

pub use codec::{decode_buffers, encode_buffers};
pub use creds::CredentialStore;
pub use error::DbError;
pub use models::*;
pub use repository::Db;
