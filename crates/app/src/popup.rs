//! Settings popup: credential entry, remaining credits, open and reset actions.

use crate::background::BackgroundService;
use services::{CredentialStore, UsageTracker};
use shared::credential::Credential;
use shared::protocol::{Request, TabId};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BannerKind {
    Success,
    Error,
}

/// Status line shown under the form; hides itself after `hide_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBanner {
    pub kind: BannerKind,
    pub message: String,
    pub hide_after: Duration,
}

impl StatusBanner {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: BannerKind::Success,
            message: message.into(),
            hide_after: Duration::from_secs(3),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: BannerKind::Error,
            message: message.into(),
            hide_after: Duration::from_secs(5),
        }
    }
}

/// What the popup renders on open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PopupView {
    /// Masked form of the saved credential
    pub credential: Option<String>,
    /// `None` when usage could not be read
    pub remaining: Option<u32>,
}

impl PopupView {
    pub fn credits_label(&self) -> String {
        self.remaining
            .map(|r| r.to_string())
            .unwrap_or_else(|| "--".to_string())
    }
}

pub struct PopupController {
    background: Arc<BackgroundService>,
    credentials: Arc<CredentialStore>,
    usage: Arc<UsageTracker>,
}

impl PopupController {
    pub fn new(
        background: Arc<BackgroundService>,
        credentials: Arc<CredentialStore>,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            background,
            credentials,
            usage,
        }
    }

    pub async fn load(&self) -> PopupView {
        let credential = match self.credentials.get().await {
            Ok(found) => found.map(|c| c.masked()),
            Err(e) => {
                tracing::error!(error = %e, "error loading API key");
                None
            }
        };
        PopupView {
            credential,
            remaining: self.remaining().await,
        }
    }

    async fn remaining(&self) -> Option<u32> {
        match self.usage.get().await {
            Ok(snapshot) => Some(snapshot.remaining),
            Err(e) => {
                tracing::error!(error = %e, "error updating credits display");
                None
            }
        }
    }

    /// Format-check locally, then hand the key to the background.
    pub async fn save_credential(&self, input: &str) -> StatusBanner {
        let key = input.trim();
        if key.is_empty() {
            return StatusBanner::error("Please enter a valid API key");
        }
        if let Err(e) = Credential::parse(key) {
            return StatusBanner::error(e.to_string());
        }

        let request = Request::UpdateApiKey {
            key_type: "claude".to_string(),
            key: key.to_string(),
        };
        match self.background.handle(request, None).await.into_result() {
            Ok(_) => StatusBanner::success("API key saved successfully"),
            Err(e) => {
                tracing::error!(error = %e, "error saving API key");
                StatusBanner::error(format!("Error: {}", e))
            }
        }
    }

    /// Open the assistant in the active tab. `None` means it opened and the
    /// popup should close.
    pub async fn open_assistant(&self, active_tab: Option<TabId>) -> Option<StatusBanner> {
        let Some(tab) = active_tab else {
            return Some(StatusBanner::error("No active tab found"));
        };
        let resp = self.background.handle(Request::ToggleHoverBox, Some(tab)).await;
        if resp.success {
            None
        } else {
            Some(StatusBanner::error(
                resp.error
                    .unwrap_or_else(|| "Failed to open assistant".to_string()),
            ))
        }
    }

    /// Returns the banner plus the refreshed credit count.
    pub async fn reset_credits(&self) -> (StatusBanner, Option<u32>) {
        match self.usage.reset().await {
            Ok(snapshot) => (
                StatusBanner::success("Credits reset successfully"),
                Some(snapshot.remaining),
            ),
            Err(e) => {
                tracing::error!(error = %e, "error resetting credits");
                (StatusBanner::error(format!("Error: {}", e)), self.remaining().await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::WidgetFactory;
    use crate::coordinator::TabCoordinator;
    use crate::host::LocalTabHost;
    use crate::testing::{RecordingFactory, Rig, StubTransport};
    use shared::settings::AssistantSettings;

    async fn popup() -> (Rig, Arc<LocalTabHost>, PopupController) {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let settings = AssistantSettings::default();
        let factory: Arc<dyn WidgetFactory> = Arc::new(RecordingFactory::new(rig.services.clone()));
        let host = Arc::new(LocalTabHost::new(factory, settings.clone()));
        host.open_tab(1, "https://example.test/tides");
        host.open_tab(2, "chrome://settings");
        let coordinator = Arc::new(TabCoordinator::new(host.clone(), &settings));
        let background = Arc::new(BackgroundService::new(
            rig.credentials.clone(),
            rig.api.clone(),
            coordinator,
        ));
        let controller =
            PopupController::new(background, rig.credentials.clone(), rig.usage.clone());
        (rig, host, controller)
    }

    #[tokio::test]
    async fn test_load_shows_masked_key_and_credits() {
        let (rig, _host, popup) = popup().await;
        rig.usage.increment().await.unwrap();
        let view = popup.load().await;
        assert_eq!(view.credential.as_deref(), Some("sk-ant-t…-key"));
        assert_eq!(view.credits_label(), "24");
        assert_eq!(PopupView::default().credits_label(), "--");
    }

    #[tokio::test]
    async fn test_save_credential() {
        let (rig, _host, popup) = popup().await;

        let banner = popup.save_credential("   ").await;
        assert_eq!(banner, StatusBanner::error("Please enter a valid API key"));

        let banner = popup.save_credential("bad-key").await;
        assert_eq!(banner.kind, BannerKind::Error);
        assert_eq!(
            banner.message,
            "Invalid Claude API key format. Should start with sk-ant- or sk-"
        );
        assert_eq!(banner.hide_after, Duration::from_secs(5));

        let banner = popup.save_credential("sk-ant-abc123").await;
        assert_eq!(banner, StatusBanner::success("API key saved successfully"));
        assert_eq!(banner.hide_after, Duration::from_secs(3));
        assert_eq!(
            rig.credentials.get().await.unwrap().unwrap().expose(),
            "sk-ant-abc123"
        );
    }

    #[tokio::test]
    async fn test_open_assistant() {
        let (_rig, host, popup) = popup().await;
        assert_eq!(
            popup.open_assistant(None).await,
            Some(StatusBanner::error("No active tab found"))
        );
        assert_eq!(popup.open_assistant(Some(1)).await, None);
        assert!(host.content(1).unwrap().is_visible().await);

        let banner = popup.open_assistant(Some(2)).await.unwrap();
        assert_eq!(banner.message, "Cannot inject into chrome://settings");
    }

    #[tokio::test]
    async fn test_reset_credits() {
        let (rig, _host, popup) = popup().await;
        for _ in 0..30 {
            rig.usage.increment().await.unwrap();
        }
        assert_eq!(popup.load().await.remaining, Some(0));
        let (banner, remaining) = popup.reset_credits().await;
        assert_eq!(banner.message, "Credits reset successfully");
        assert_eq!(remaining, Some(25));
    }
}
