use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use tabreader_core::message::{self, Message};
use tabreader_core::{Error, Result};

use crate::auth::auth_line;
use crate::codec::{write_line, LineReader};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Matches the bridge's own request timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client side of the TCP bridge, for local automation tools: a kept-alive
/// connection to a running bridge. Requests are sent one at a
/// time; each waits for its response line before the next goes out.
pub struct BridgeClient {
    lines: LineReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    response_timeout: Duration,
}

impl BridgeClient {
    /// Connect and, when a token is given, send the `AUTH` line.
    pub async fn connect(addr: SocketAddr, token: Option<&str>) -> Result<Self> {
        let stream = match tokio::time::timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(Error::Connection(format!(
                    "bridge is not running on {}: make sure the browser is running with the extension loaded and the native host installed",
                    addr
                )));
            }
            Ok(Err(e)) => {
                return Err(Error::Connection(format!(
                    "failed to connect to bridge at {}: {}",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(Error::Timeout(format!("connecting to bridge at {}", addr)));
            }
        };
        stream.set_nodelay(true)?;
        let (read_half, mut writer) = stream.into_split();

        if let Some(token) = token {
            writer.write_all(auth_line(token).as_bytes()).await?;
            writer.flush().await?;
        }
        debug!(%addr, auth = token.is_some(), "Connected to bridge");

        Ok(Self {
            lines: LineReader::new(read_half),
            writer,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Send one request and wait for its response line.
    pub async fn request(&mut self, request: &Message) -> Result<Message> {
        write_line(&mut self.writer, request).await?;
        match self.lines.read_message(self.response_timeout).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(Error::Connection(
                "bridge closed the connection without a response".to_string(),
            )),
            Err(Error::Timeout(_)) => Err(Error::Timeout(format!(
                "no response from bridge within {}s",
                self.response_timeout.as_secs()
            ))),
            Err(e) => Err(e),
        }
    }

    /// `{"action": action, ...params}`
    pub async fn call(&mut self, action: &str, params: Message) -> Result<Message> {
        let mut request = params;
        request.insert(message::ACTION_FIELD.to_string(), Value::from(action));
        self.request(&request).await
    }
}

/// Whether something accepts TCP connections on `addr`.
pub async fn is_listening(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
