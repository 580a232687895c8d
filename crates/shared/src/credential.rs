//! API credential type and the auth scheme it implies.

use crate::error::{AssistantError, AssistantResult};
use async_trait::async_trait;
use std::fmt;
use zeroize::Zeroize;

const KEY_HEADER_PREFIX: &str = "sk-ant-";
const BEARER_PREFIX: &str = "sk-";

/// How a credential is presented to the messages endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `x-api-key: <credential>` for `sk-ant-` keys
    KeyHeader,
    /// `Authorization: Bearer <credential>` for every other `sk-` key
    Bearer,
}

impl AuthScheme {
    /// The single header (name, value) this scheme sets.
    pub fn header(&self, credential: &Credential) -> (&'static str, String) {
        match self {
            AuthScheme::KeyHeader => ("x-api-key", credential.expose().to_string()),
            AuthScheme::Bearer => ("Authorization", format!("Bearer {}", credential.expose())),
        }
    }
}

/// Opaque API secret. Always trimmed, non-empty and carrying a recognized prefix.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn parse(raw: &str) -> AssistantResult<Self> {
        let trimmed = raw.trim();
        let has_body = |prefix: &str| {
            trimmed
                .strip_prefix(prefix)
                .map(|rest| !rest.is_empty())
                .unwrap_or(false)
        };
        let valid = if trimmed.starts_with(KEY_HEADER_PREFIX) {
            has_body(KEY_HEADER_PREFIX)
        } else {
            has_body(BEARER_PREFIX)
        };
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(AssistantError::InvalidFormat)
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        if self.0.starts_with(KEY_HEADER_PREFIX) {
            AuthScheme::KeyHeader
        } else {
            AuthScheme::Bearer
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Display form safe for logs and settings surfaces.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 12 {
            let head: String = chars.iter().take(3).collect();
            return format!("{}…", head);
        }
        let head: String = chars.iter().take(8).collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.masked()).finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Read access to the current credential.
///
/// The API client resolves the credential through this on every dispatch,
/// so a save made anywhere in the process applies to the next query.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> AssistantResult<Option<Credential>>;
}
