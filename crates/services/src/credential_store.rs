//! Process-wide credential store.
//!
//! Durable storage is the source of truth; the in-process cache is updated on
//! every successful write so reads after a save never see the old value.

use crate::storage::KeyValueStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use shared::credential::{Credential, CredentialProvider};
use shared::storage_keys;
use shared::{AssistantError, AssistantResult};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tokio::sync::OnceCell;

static FALLBACK_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:export\s+)?[A-Z][A-Z0-9_]*KEY\s*=\s*["']([^"']+)["']"#)
        .expect("fallback credential pattern")
});

pub struct CredentialStore {
    storage: Arc<dyn KeyValueStore>,
    cache: RwLock<Option<Credential>>,
    fallback_path: Option<PathBuf>,
    fallback: OnceCell<Option<Credential>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            cache: RwLock::new(None),
            fallback_path: None,
            fallback: OnceCell::new(),
        }
    }

    /// Bundled `.env`-style resource consulted when storage holds no credential.
    pub fn with_fallback(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_path = Some(path.into());
        self
    }

    pub async fn get(&self) -> AssistantResult<Option<Credential>> {
        if let Some(cached) = self.cache.read().clone() {
            return Ok(Some(cached));
        }
        self.load_fallback().await
    }

    pub async fn set(&self, raw: &str) -> AssistantResult<Credential> {
        let credential = Credential::parse(raw)?;
        self.persist(&credential).await?;
        tracing::info!(key = %credential.masked(), "credential updated");
        Ok(credential)
    }

    /// Storage first; if it is empty, read the bundled resource (at most once
    /// per process) and persist what it holds.
    pub async fn load_fallback(&self) -> AssistantResult<Option<Credential>> {
        if let Some(stored) = self.read_stored().await? {
            *self.cache.write() = Some(stored.clone());
            return Ok(Some(stored));
        }

        let found = self
            .fallback
            .get_or_init(|| self.read_fallback_resource())
            .await
            .clone();
        if let Some(credential) = &found {
            self.persist(credential).await?;
            tracing::info!(key = %credential.masked(), "loaded credential from bundled resource");
        }
        Ok(found)
    }

    async fn read_stored(&self) -> AssistantResult<Option<Credential>> {
        let value = self
            .storage
            .get(storage_keys::CREDENTIAL)
            .await
            .map_err(AssistantError::storage)?;
        let Some(Value::String(raw)) = value else {
            return Ok(None);
        };
        match Credential::parse(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(_) => {
                tracing::warn!("ignoring stored credential with unrecognized format");
                Ok(None)
            }
        }
    }

    async fn persist(&self, credential: &Credential) -> AssistantResult<()> {
        self.storage
            .set(
                storage_keys::CREDENTIAL,
                Value::String(credential.expose().to_string()),
            )
            .await
            .map_err(AssistantError::storage)?;
        *self.cache.write() = Some(credential.clone());
        Ok(())
    }

    async fn read_fallback_resource(&self) -> Option<Credential> {
        let path = self.fallback_path.as_ref()?;
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "no fallback credential resource");
                return None;
            }
        };
        let credential = parse_fallback(&text);
        if credential.is_none() {
            tracing::warn!(path = %path.display(), "fallback resource holds no usable credential");
        }
        credential
    }
}

/// First `NAME_KEY="value"` assignment whose value is a well-formed credential.
pub fn parse_fallback(text: &str) -> Option<Credential> {
    FALLBACK_ASSIGNMENT
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .find_map(|m| Credential::parse(m.as_str()).ok())
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    async fn credential(&self) -> AssistantResult<Option<Credential>> {
        self.get().await
    }
}
