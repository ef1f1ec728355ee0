use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error, info, warn};

use tabreader_core::message::{self, Message, ERR_AUTH_REQUIRED, ERR_NOT_CONNECTED, ERR_TIMEOUT};
use tabreader_core::{BridgeConfig, Error, Result};

use crate::auth::AuthPolicy;
use crate::codec::line::DEFAULT_MAX_LINE_BYTES;
use crate::codec::{write_line, LineReader};
use crate::session::ExtensionSession;

/// Single host, a handful of clients.
const LISTEN_BACKLOG: u32 = 5;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub request_timeout: Duration,
    pub read_timeout: Duration,
    pub max_line_bytes: usize,
    pub auth: AuthPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            auth: AuthPolicy::Disabled,
        }
    }
}

impl ServerSettings {
    pub fn from_config(config: &BridgeConfig, auth: AuthPolicy) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            read_timeout: config.read_timeout(),
            max_line_bytes: config.max_line_bytes,
            auth,
        }
    }
}

pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    session: Arc<ExtensionSession>,
    settings: Arc<ServerSettings>,
}

impl BridgeServer {
    /// Bind the listening socket.
    ///
    /// Non-loopback addresses are refused. A port that is already taken
    /// yields `Error::AddressInUse`, which callers treat as "another bridge
    /// instance owns the port".
    pub fn bind(
        addr: SocketAddr,
        session: Arc<ExtensionSession>,
        settings: ServerSettings,
    ) -> Result<Self> {
        if !addr.ip().is_loopback() {
            return Err(Error::Config(format!(
                "refusing to listen on non-loopback address {}",
                addr
            )));
        }

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        // On Windows SO_REUSEADDR would let a second instance steal the port.
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;
        socket.bind(addr).map_err(|e| bind_error(addr, e))?;
        let listener = socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| bind_error(addr, e))?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            auth = settings.auth.is_required(),
            "TCP server listening"
        );
        Ok(Self {
            listener,
            local_addr,
            session,
            settings: Arc::new(settings),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, one task per client.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!(%peer, "TCP client connected");
                    let conn = Connection {
                        peer,
                        session: self.session.clone(),
                        settings: self.settings.clone(),
                    };
                    tokio::spawn(async move {
                        if let Err(e) = conn.serve(stream).await {
                            if e.is_disconnect() {
                                debug!(%peer, error = %e, "TCP client went away mid-response");
                            } else {
                                warn!(%peer, error = %e, "TCP client handler failed");
                            }
                        }
                        debug!(%peer, "TCP client handler exiting");
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept TCP connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

fn bind_error(addr: SocketAddr, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::AddrInUse {
        Error::AddressInUse(addr.to_string())
    } else {
        Error::Io(e)
    }
}

struct Connection {
    peer: SocketAddr,
    session: Arc<ExtensionSession>,
    settings: Arc<ServerSettings>,
}

impl Connection {
    async fn serve(&self, stream: TcpStream) -> Result<()> {
        let peer = self.peer;
        let (read_half, mut writer) = stream.into_split();
        let mut lines = LineReader::with_max_len(read_half, self.settings.max_line_bytes);

        if self.settings.auth.is_required() {
            let verdict = match lines.read_line(self.settings.read_timeout).await {
                Ok(Some(line)) => self.settings.auth.check_line(&line),
                Ok(None) => {
                    debug!(%peer, "TCP client closed before authenticating");
                    return Ok(());
                }
                Err(e) => Err(e),
            };
            if let Err(e) = verdict {
                warn!(%peer, error = %e, "Rejected TCP client");
                write_line(&mut writer, &message::error_response(ERR_AUTH_REQUIRED)).await?;
                return Ok(());
            }
            info!(%peer, "TCP client authenticated");
        }

        let mut served: u64 = 0;
        loop {
            let line = match lines.read_line(self.settings.read_timeout).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(Error::Timeout(_)) => {
                    debug!(%peer, "TCP client idle too long, closing");
                    break;
                }
                Err(Error::Protocol(e)) => {
                    warn!(%peer, error = %e, "Unreadable request, closing");
                    write_line(&mut writer, &message::error_response(e)).await?;
                    break;
                }
                Err(e) => return Err(e),
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let request = match message::parse(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(%peer, error = %e, "Invalid JSON from TCP client");
                    let response = message::error_response(format!("Invalid JSON: {}", e));
                    write_line(&mut writer, &response).await?;
                    continue;
                }
            };

            served += 1;
            let response = self.forward(request, served).await;
            write_line(&mut writer, &response).await?;
        }

        info!(%peer, served, "TCP client disconnected");
        Ok(())
    }

    async fn forward(&self, request: Message, seq: u64) -> Message {
        let peer = self.peer;
        let action = message::action(&request).unwrap_or("unknown").to_string();
        info!(%peer, seq, action = %action, "Request from TCP client");

        match self
            .session
            .request(request, self.settings.request_timeout)
            .await
        {
            Ok(mut reply) => {
                // The correlation id is bridge-internal.
                message::take_request_id(&mut reply);
                reply
            }
            Err(Error::ExtensionDisconnected) => {
                debug!(%peer, action = %action, "Extension not connected");
                message::error_response(ERR_NOT_CONNECTED)
            }
            Err(Error::Timeout(detail)) => {
                warn!(%peer, action = %action, %detail, "Extension did not answer in time");
                message::error_response(ERR_TIMEOUT)
            }
            Err(e) => {
                error!(%peer, action = %action, error = %e, "Forwarding to extension failed");
                message::error_response(e.to_string())
            }
        }
    }
}
