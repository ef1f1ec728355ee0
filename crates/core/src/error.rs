use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("extension not connected")]
    ExtensionDisconnected,

    #[error("request {0} already has a pending slot")]
    DuplicateRequest(u64),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Address already in use: {0}")]
    AddressInUse(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl Error {
    /// Whether the error was caused by a peer closing or breaking the stream
    /// rather than by anything the bridge did.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::ExtensionDisconnected => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
