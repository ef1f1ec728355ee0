use std::time::Duration;

use tabreader_bridge::is_listening;
use tabreader_core::Paths;

use super::BridgeTarget;

const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Verify that something accepts connections on the bridge port.
pub async fn run(paths: &Paths, target: &BridgeTarget) -> anyhow::Result<()> {
    let (_, addr) = target.resolve(paths)?;
    if is_listening(addr, CHECK_TIMEOUT).await {
        println!("✓ bridge is listening on {}", addr);
        Ok(())
    } else {
        println!("✗ nothing is listening on {}", addr);
        println!();
        println!("Make sure the browser is running with the extension loaded");
        println!("and the native host manifest points at this binary.");
        anyhow::bail!("bridge not reachable on {}", addr)
    }
}
