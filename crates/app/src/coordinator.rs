//! Process-wide tab coordinator.
//!
//! Injects the content side into a tab on first use, remembers which tabs
//! already have it and forwards commands. Every outcome, including injection
//! and forwarding failures, comes back as a [`Response`].

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::protocol::{ContentCommand, Response, TabId};
use shared::settings::AssistantSettings;
use shared::{AssistantError, AssistantResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Schemes that belong to the browser itself and never accept injection.
const RESTRICTED_SCHEMES: &[&str] = &[
    "chrome",
    "chrome-extension",
    "chrome-search",
    "chrome-untrusted",
    "devtools",
    "edge",
    "about",
    "view-source",
];

/// The browser tabs API, as far as the coordinator needs it.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// URL of the tab, `None` when the tab does not exist.
    async fn tab_url(&self, tab: TabId) -> anyhow::Result<Option<String>>;
    /// Load the content side into the tab.
    async fn inject(&self, tab: TabId) -> anyhow::Result<()>;
    /// Deliver a command to the tab's content side and wait for its reply.
    async fn send(&self, tab: TabId, command: ContentCommand) -> anyhow::Result<Response>;
}

pub struct TabCoordinator {
    host: Arc<dyn TabHost>,
    injected: Mutex<HashSet<TabId>>,
    inject_gate: tokio::sync::Mutex<()>,
    toggle_timeout: Duration,
    init_timeout: Duration,
}

impl TabCoordinator {
    pub fn new(host: Arc<dyn TabHost>, settings: &AssistantSettings) -> Self {
        Self {
            host,
            injected: Mutex::new(HashSet::new()),
            inject_gate: tokio::sync::Mutex::new(()),
            toggle_timeout: settings.toggle_timeout(),
            init_timeout: settings.init_timeout(),
        }
    }

    pub async fn toggle(&self, tab: TabId) -> Response {
        tracing::debug!(tab, "toggle requested");
        match self.try_toggle(tab).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(tab, error = %e, "toggle failed");
                Response::failure(&e)
            }
        }
    }

    async fn try_toggle(&self, tab: TabId) -> AssistantResult<Response> {
        self.ensure_injected(tab).await?;
        // The content side may have to build a widget before toggling it
        let bound = self.init_timeout + self.toggle_timeout;
        match tokio::time::timeout(bound, self.forward(tab, ContentCommand::Toggle)).await {
            Ok(result) => result,
            Err(_) => Err(AssistantError::timeout("toggleHoverBox", bound)),
        }
    }

    /// Context-menu entry point: inject if needed, then hand the selection over.
    pub async fn process_selection(&self, tab: TabId, selected_text: &str) -> Response {
        let command = ContentCommand::ProcessSelection {
            selected_text: selected_text.to_string(),
        };
        let result = match self.ensure_injected(tab).await {
            Ok(_) => self.forward(tab, command).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::error!(tab, error = %e, "processing selection failed");
            Response::failure(&e)
        })
    }

    /// Returns whether this call performed the injection.
    async fn ensure_injected(&self, tab: TabId) -> AssistantResult<bool> {
        let url = self
            .host
            .tab_url(tab)
            .await
            .map_err(|e| AssistantError::Messaging(e.to_string()))?
            .ok_or_else(|| AssistantError::InvalidRequest("Tab not found".into()))?;
        check_injectable(&url)?;

        // Serialize injection so two concurrent toggles cannot both inject
        let _gate = self.inject_gate.lock().await;
        if self.injected.lock().contains(&tab) {
            return Ok(false);
        }
        tracing::info!(tab, %url, "injecting content side");
        self.host
            .inject(tab)
            .await
            .map_err(|e| AssistantError::Injection(e.to_string()))?;
        self.injected.lock().insert(tab);
        Ok(true)
    }

    async fn forward(&self, tab: TabId, command: ContentCommand) -> AssistantResult<Response> {
        self.host
            .send(tab, command)
            .await
            .map_err(|e| AssistantError::Messaging(e.to_string()))
    }

    /// Tab closed: forget it. Unknown tabs are fine.
    pub fn on_tab_removed(&self, tab: TabId) {
        if self.injected.lock().remove(&tab) {
            tracing::debug!(tab, "tab removed from injection registry");
        }
    }

    pub fn is_injected(&self, tab: TabId) -> bool {
        self.injected.lock().contains(&tab)
    }

    /// Extension reload: forget every tab.
    pub fn clear(&self) {
        self.injected.lock().clear();
    }
}

/// Reject browser-internal pages and anything that is not a URL at all.
pub fn check_injectable(raw: &str) -> AssistantResult<()> {
    match Url::parse(raw) {
        Ok(url) if !RESTRICTED_SCHEMES.contains(&url.scheme()) => Ok(()),
        _ => Err(AssistantError::RestrictedPage(raw.to_string())),
    }
}
