//! Background message router.
//!
//! Receives protocol messages from the popup and content sides and answers
//! each with exactly one [`Response`]. Nothing here returns an error to the
//! sender unstructured.

use crate::coordinator::TabCoordinator;
use providers::ApiClient;
use serde_json::Value;
use services::CredentialStore;
use shared::protocol::{Request, Response, TabId};
use shared::{AssistantError, AssistantResult};
use std::sync::Arc;

/// The only credential family and model family this build talks to.
const CLAUDE: &str = "claude";

pub struct BackgroundService {
    credentials: Arc<CredentialStore>,
    api: Arc<ApiClient>,
    coordinator: Arc<TabCoordinator>,
}

impl BackgroundService {
    pub fn new(
        credentials: Arc<CredentialStore>,
        api: Arc<ApiClient>,
        coordinator: Arc<TabCoordinator>,
    ) -> Self {
        Self {
            credentials,
            api,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Arc<TabCoordinator> {
        &self.coordinator
    }

    /// Decode and answer a raw message. `sender` is the tab the message came
    /// from, or the tab a popup/context-menu action targets.
    pub async fn handle_value(&self, message: Value, sender: Option<TabId>) -> Response {
        match Request::from_value(message) {
            Ok(request) => self.handle(request, sender).await,
            Err(e) => {
                tracing::warn!(error = %e, "background rejected message");
                Response::failure(&e)
            }
        }
    }

    pub async fn handle(&self, request: Request, sender: Option<TabId>) -> Response {
        tracing::debug!(action = request.action(), ?sender, "background received message");
        let outcome = match request {
            Request::ValidateApiKey { live } => return Response::validation(self.validate(live).await),
            Request::UpdateApiKey { key_type, key } => self.update_key(&key_type, &key).await,
            Request::CallApi { model, prompt } => self.call_api(&model, &prompt).await,
            Request::ToggleHoverBox => match sender {
                Some(tab) => Ok(self.coordinator.toggle(tab).await),
                None => Err(no_tab()),
            },
            Request::ProcessSelection { selected_text } => match sender {
                Some(tab) => Ok(self.coordinator.process_selection(tab, &selected_text).await),
                None => Err(no_tab()),
            },
        };
        outcome.unwrap_or_else(|e| {
            tracing::error!(error = %e, "background request failed");
            Response::failure(&e)
        })
    }

    async fn validate(&self, live: bool) -> AssistantResult<()> {
        let credential = self
            .credentials
            .get()
            .await?
            .ok_or(AssistantError::NotConfigured)?;
        if live {
            self.api.verify(credential.expose()).await?;
        }
        Ok(())
    }

    async fn update_key(&self, key_type: &str, key: &str) -> AssistantResult<Response> {
        if key_type.is_empty() || key.trim().is_empty() {
            return Err(AssistantError::InvalidRequest("Missing key type or key".into()));
        }
        if key_type != CLAUDE {
            return Err(AssistantError::InvalidRequest(format!(
                "Unknown API type: {}",
                key_type
            )));
        }
        self.credentials.set(key).await?;
        Ok(Response::ok())
    }

    async fn call_api(&self, model: &str, prompt: &str) -> AssistantResult<Response> {
        if model != CLAUDE {
            return Err(AssistantError::InvalidRequest(
                "Only Claude API is supported in this version".into(),
            ));
        }
        let reply = self.api.query(prompt, None).await?;
        Ok(Response::ok().with_data(reply.raw))
    }
}

fn no_tab() -> AssistantError {
    AssistantError::InvalidRequest("No active tab found".into())
}
