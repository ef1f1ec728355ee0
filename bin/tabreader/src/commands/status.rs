use std::time::Duration;

use tabreader_bridge::is_listening;
use tabreader_core::{Config, Paths, TokenStore};

pub async fn run(paths: &Paths) -> anyhow::Result<()> {
    println!("tabreader status");
    println!("================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "(defaults)" }
    );
    let tokens_path = paths.tokens_file();
    println!(
        "Tokens:    {} {}",
        tokens_path.display(),
        if tokens_path.exists() { "✓" } else { "✗ (not found)" }
    );
    println!("Log file:  {}", paths.log_file().display());
    println!();

    let config = Config::load_or_default(paths)?;
    let bridge = &config.bridge;
    println!("Bridge:");
    println!("  address          {}:{}", bridge.host, bridge.port);
    println!("  request timeout  {}s", bridge.request_timeout().as_secs());
    println!("  read timeout     {}s", bridge.read_timeout().as_secs());
    println!("  max line         {} bytes", bridge.max_line_bytes);
    if bridge.require_auth {
        let count = if tokens_path.exists() {
            TokenStore::load(&tokens_path)?.token_set().len()
        } else {
            0
        };
        println!("  auth             required ({} token(s))", count);
    } else {
        println!("  auth             disabled");
    }
    println!();

    match bridge.socket_addr() {
        Ok(addr) if is_listening(addr, Duration::from_secs(1)).await => {
            println!("State:     ✓ listening on {}", addr);
        }
        Ok(addr) => println!("State:     ✗ not running on {}", addr),
        Err(e) => println!("State:     ✗ invalid address: {}", e),
    }
    Ok(())
}
