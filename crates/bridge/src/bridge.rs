use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info};

use tabreader_core::Error;

use crate::server::{BridgeServer, ServerSettings};
use crate::session::{ExtensionSession, ReaderExit};

/// The extension session plus its TCP front end. Lives exactly as long as
/// the extension's stdio pipe.
pub struct Bridge {
    session: Arc<ExtensionSession>,
    addr: SocketAddr,
    settings: ServerSettings,
}

impl Bridge {
    pub fn new<W>(writer: W, addr: SocketAddr, settings: ServerSettings) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            session: Arc::new(ExtensionSession::new(writer)),
            addr,
            settings,
        }
    }

    /// Bind the TCP side.
    ///
    /// A failed bind is not fatal: another bridge instance usually owns the
    /// port, and this one still has to drain its extension pipe until the
    /// browser closes it.
    pub fn bind(self) -> BoundBridge {
        let server = match BridgeServer::bind(self.addr, self.session.clone(), self.settings) {
            Ok(server) => Some(server),
            Err(Error::AddressInUse(addr)) => {
                info!(%addr, "Port already in use, another bridge instance is likely serving it; continuing without TCP");
                None
            }
            Err(e) => {
                error!(addr = %self.addr, error = %e, "Failed to start TCP server; continuing without TCP");
                None
            }
        };
        BoundBridge {
            session: self.session,
            server,
        }
    }

    /// Bind, then serve until the extension pipe closes.
    pub async fn run<R>(self, reader: R) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        self.bind().run(reader).await
    }
}

pub struct BoundBridge {
    session: Arc<ExtensionSession>,
    server: Option<BridgeServer>,
}

impl BoundBridge {
    /// The TCP address clients can reach, if the bind succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(BridgeServer::local_addr)
    }

    pub fn session(&self) -> Arc<ExtensionSession> {
        self.session.clone()
    }

    pub async fn run<R>(self, reader: R) -> ReaderExit
    where
        R: AsyncRead + Unpin,
    {
        let listener = self.server.map(|server| tokio::spawn(server.run()));

        let exit = self.session.run_reader(reader).await;

        if let Some(task) = listener {
            task.abort();
        }
        info!(?exit, received = self.session.received(), "Bridge shut down");
        exit
    }
}
