use std::path::Path;

use clap::Args;
use tracing::{debug, info};

use tabreader_bridge::{AuthPolicy, Bridge, ServerSettings};
use tabreader_core::{Config, Paths, TokenStore};

use super::BridgeTarget;

#[derive(Args, Debug, Clone, Default)]
pub struct HostArgs {
    /// Launch arguments from the browser (extension origin, manifest path);
    /// recorded and otherwise ignored
    #[arg(value_name = "ORIGIN")]
    pub launch_args: Vec<String>,

    /// Window handle passed by Chrome on Windows
    #[arg(long, value_name = "HANDLE")]
    pub parent_window: Option<String>,

    /// Require `AUTH <token>` from TCP clients (overrides config bridge.requireAuth)
    #[arg(long)]
    pub require_auth: bool,

    #[command(flatten)]
    pub target: BridgeTarget,
}

/// Serve the extension on stdin/stdout until the browser closes the pipe.
pub async fn run(
    args: HostArgs,
    mut config: Config,
    paths: &Paths,
    log_file: Option<&Path>,
) -> anyhow::Result<()> {
    if !args.launch_args.is_empty() || args.parent_window.is_some() {
        debug!(
            launch_args = ?args.launch_args,
            parent_window = ?args.parent_window,
            "Launched by browser"
        );
    }

    args.target.apply(&mut config.bridge);
    if args.require_auth {
        config.bridge.require_auth = true;
    }
    let addr = config.bridge.socket_addr()?;
    let auth = load_auth(&config, paths)?;

    info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        %addr,
        auth = auth.is_required(),
        log_file = %log_file.map(|p| p.display().to_string()).unwrap_or_else(|| "-".to_string()),
        "Native messaging host starting"
    );

    let settings = ServerSettings::from_config(&config.bridge, auth);
    let bridge = Bridge::new(tokio::io::stdout(), addr, settings);
    let exit = bridge.run(tokio::io::stdin()).await;

    info!(?exit, "Native messaging host exiting");
    Ok(())
}

fn load_auth(config: &Config, paths: &Paths) -> anyhow::Result<AuthPolicy> {
    if !config.bridge.require_auth {
        return Ok(AuthPolicy::Disabled);
    }

    let tokens_file = paths.tokens_file();
    let tokens = TokenStore::load_or_create(&tokens_file)?.token_set();
    if tokens.is_empty() {
        anyhow::bail!(
            "authentication is required but {} has no tokens; add one with `tabreader tokens generate`",
            tokens_file.display()
        );
    }
    info!(count = tokens.len(), path = %tokens_file.display(), "Loaded bridge tokens");
    Ok(AuthPolicy::Tokens(tokens))
}
