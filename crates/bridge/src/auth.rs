use std::collections::HashSet;

use tabreader_core::{Error, Result};

const AUTH_PREFIX: &str = "AUTH ";

/// Whether TCP clients must open with an `AUTH <token>` line.
#[derive(Debug, Clone, Default)]
pub enum AuthPolicy {
    #[default]
    Disabled,
    Tokens(HashSet<String>),
}

impl AuthPolicy {
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AuthPolicy::Tokens(tokens.into_iter().map(Into::into).collect())
    }

    pub fn is_required(&self) -> bool {
        matches!(self, AuthPolicy::Tokens(_))
    }

    /// Validate the first line of a connection.
    pub fn check_line(&self, line: &[u8]) -> Result<()> {
        let tokens = match self {
            AuthPolicy::Disabled => return Ok(()),
            AuthPolicy::Tokens(tokens) => tokens,
        };

        let line = std::str::from_utf8(line)
            .map_err(|_| Error::Auth("auth line is not valid UTF-8".to_string()))?
            .trim();
        let token = line
            .strip_prefix(AUTH_PREFIX)
            .ok_or_else(|| Error::Auth("client did not send an AUTH line".to_string()))?;

        // Compare against every token so timing does not reveal which one matched.
        let matched = tokens
            .iter()
            .fold(false, |found, t| constant_time_eq(token.as_bytes(), t.as_bytes()) | found);
        if matched {
            Ok(())
        } else {
            Err(Error::Auth("invalid token".to_string()))
        }
    }
}

/// The line a client sends to authenticate.
pub fn auth_line(token: &str) -> String {
    format!("{}{}\n", AUTH_PREFIX, token)
}

/// Runtime depends only on the lengths, never on where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let diff = a
        .iter()
        .zip(b)
        .fold(a.len() ^ b.len(), |acc, (x, y)| acc | usize::from(x ^ y));
    diff == 0
}
