//! visitrack-core — shared types, connection protocol, and configuration.
//! All other visitrack crates depend on this one.

pub mod config;
pub mod protocol;
pub mod session;
pub mod visitor;

pub use protocol::{ClientMessage, ServerMessage};
pub use session::{DisplayRecord, Metadata, Session, SessionId};
