//! Capability tokens that gate subscriber admission.
//!
//! A [`Token`] is an opaque random value. The [`TokenManager`] maps each
//! token to the single stream it currently authorizes. Granting the same
//! token for another stream overwrites the previous grant.
//!
//! # Example
//!
//! ```rust
//! use wspub_server::tokens::{Token, TokenManager};
//!
//! let tokens = TokenManager::new();
//! let token = Token::random();
//!
//! tokens.issue("s1", token);
//! assert!(tokens.validate("s1", token));
//! assert!(!tokens.validate("s2", token));
//!
//! // Revoking under the wrong stream is a no-op.
//! assert!(!tokens.revoke("s2", token));
//! assert!(tokens.revoke("s1", token));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

/// Opaque capability value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Uuid);

impl Token {
    /// Generates a new random token.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for Token {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for Token {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Thread-safe token -> stream grant table.
///
/// Reads (validation) share the lock; issuing and revoking take it
/// exclusively.
#[derive(Debug, Default)]
pub struct TokenManager {
    tokens: RwLock<HashMap<Token, String>>,
}

impl TokenManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `token` access to `stream`, replacing any earlier grant.
    pub fn issue(&self, stream: &str, token: Token) {
        let previous = self
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, stream.to_string());

        match previous {
            Some(previous) if previous != stream => {
                debug!(%token, stream, previous_stream = %previous, "Token re-issued for another stream");
            }
            _ => trace!(%token, stream, "Token issued"),
        }
    }

    /// Returns `true` iff `token` is currently granted for exactly `stream`.
    #[must_use]
    pub fn validate(&self, stream: &str, token: Token) -> bool {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&token)
            .is_some_and(|granted| granted == stream)
    }

    /// Removes the grant for `token`, but only if it belongs to `stream`.
    ///
    /// Returns whether a grant was removed.
    pub fn revoke(&self, stream: &str, token: Token) -> bool {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        if tokens.get(&token).is_some_and(|granted| granted == stream) {
            tokens.remove(&token);
            debug!(%token, stream, "Token revoked");
            true
        } else {
            trace!(%token, stream, "Token not granted for stream, nothing to revoke");
            false
        }
    }

    /// Removes and returns every token granted for `stream`.
    pub fn revoke_all_for_stream(&self, stream: &str) -> Vec<Token> {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let revoked: Vec<Token> = tokens
            .iter()
            .filter(|(_, granted)| granted.as_str() == stream)
            .map(|(token, _)| *token)
            .collect();
        for token in &revoked {
            tokens.remove(token);
        }

        debug!(stream, revoked = revoked.len(), "Revoked all tokens for stream");
        revoked
    }

    /// Number of live grants.
    pub fn len(&self) -> usize {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
