use std::time::Duration;

use serde_json::Value;

use tabreader_bridge::BridgeClient;
use tabreader_core::message::{self, Message};
use tabreader_core::{Paths, TokenStore};

use super::BridgeTarget;

const TOKEN_ENV: &str = "TABREADER_TOKEN";

/// Send one request through a running bridge and print the reply.
pub async fn run(
    paths: &Paths,
    target: &BridgeTarget,
    action: &str,
    params: &[String],
    json: Option<&str>,
    token: Option<String>,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let (config, addr) = target.resolve(paths)?;
    let request = build_request(json, params)?;

    let token = token
        .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty()))
        .or_else(|| {
            if config.bridge.require_auth {
                first_stored_token(paths)
            } else {
                None
            }
        });

    let mut client = BridgeClient::connect(addr, token.as_deref())
        .await?
        .with_response_timeout(Duration::from_secs(timeout_secs.max(1)));
    let reply = client.call(action, request).await?;

    println!("{}", serde_json::to_string_pretty(&reply)?);

    if message::is_error(&reply) {
        let detail = reply
            .get(message::ERROR_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("bridge returned an error: {}", detail);
    }
    Ok(())
}

fn first_stored_token(paths: &Paths) -> Option<String> {
    let path = paths.tokens_file();
    if !path.exists() {
        return None;
    }
    TokenStore::load(&path)
        .ok()
        .and_then(|store| store.token_set().into_iter().next())
}

/// Start from `--json` (if any) and layer `--param key=value` pairs on top.
fn build_request(json: Option<&str>, params: &[String]) -> anyhow::Result<Message> {
    let mut request = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => map,
            _ => anyhow::bail!("--json must be a JSON object"),
        },
        None => Message::new(),
    };

    for param in params {
        let (key, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid --param '{}', expected key=value", param))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid --param '{}', empty key", param);
        }
        // Bare words stay strings; numbers, booleans and JSON literals keep their type.
        let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::from(value));
        request.insert(key.to_string(), value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_request_layers_params_over_json() {
        let params = vec![
            "tab_id=42".to_string(),
            "strategy=three-phase".to_string(),
            "wait=true".to_string(),
        ];
        let request = build_request(Some(r#"{"tab_id": 1, "url": "https://x"}"#), &params).unwrap();
        assert_eq!(
            Value::Object(request),
            json!({"tab_id": 42, "url": "https://x", "strategy": "three-phase", "wait": true})
        );
    }

    #[test]
    fn test_build_request_rejects_bad_input() {
        assert!(build_request(Some("[1]"), &[]).is_err());
        assert!(build_request(None, &["novalue".to_string()]).is_err());
        assert!(build_request(None, &["=x".to_string()]).is_err());
        assert!(build_request(None, &[]).unwrap().is_empty());
    }
}
