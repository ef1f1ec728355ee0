pub mod check;
pub mod host;
pub mod request;
pub mod status;
pub mod tokens;

use std::net::SocketAddr;

use clap::Args;

use tabreader_core::{BridgeConfig, Config, Paths};

pub use host::HostArgs;

/// Where to find a running bridge. Unset fields come from config.json.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeTarget {
    /// Bridge port (overrides config bridge.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bridge host (overrides config bridge.host)
    #[arg(long)]
    pub host: Option<String>,
}

impl BridgeTarget {
    pub fn apply(&self, bridge: &mut BridgeConfig) {
        if let Some(port) = self.port {
            bridge.port = port;
        }
        if let Some(host) = &self.host {
            bridge.host = host.clone();
        }
    }

    pub fn resolve(&self, paths: &Paths) -> anyhow::Result<(Config, SocketAddr)> {
        let mut config = Config::load_or_default(paths)?;
        self.apply(&mut config.bridge);
        let addr = config.bridge.socket_addr()?;
        Ok((config, addr))
    }
}
