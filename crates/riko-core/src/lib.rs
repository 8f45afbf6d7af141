mod content;
mod envelope;
mod jid;
mod status;

pub use content::*;
pub use envelope::*;
pub use jid::*;
pub use status::*;
