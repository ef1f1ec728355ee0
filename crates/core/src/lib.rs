pub mod config;
pub mod error;
pub mod message;
pub mod paths;

pub use config::{generate_token, BridgeConfig, Config, LoggingConfig, TokenStore};
pub use error::{Error, Result};
pub use message::Message;
pub use paths::Paths;
