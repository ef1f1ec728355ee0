pub mod auth;
pub mod bridge;
pub mod client;
pub mod codec;
pub mod pending;
pub mod server;
pub mod session;

#[cfg(test)]
mod testing;

pub use auth::AuthPolicy;
pub use bridge::{BoundBridge, Bridge};
pub use client::{is_listening, BridgeClient};
pub use pending::{PendingHandle, PendingTable};
pub use server::{BridgeServer, ServerSettings};
pub use session::{ExtensionSession, ReaderExit};
