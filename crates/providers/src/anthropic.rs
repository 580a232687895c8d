use crate::transport::{HttpTransport, OutboundRequest, TransportResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::agent_api::ChatMessage;
use shared::credential::{Credential, CredentialProvider};
use shared::page::PageContext;
use shared::settings::AssistantSettings;
use shared::{AssistantError, AssistantResult};
use std::sync::Arc;
use tokio::sync::Mutex;

const VERIFY_PROMPT: &str = "Hello, this is an API key validation test.";

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub text: String,
    pub raw: Value,
}

/// Messages API client that runs one query at a time.
///
/// Every `query` takes the single dispatch slot before touching the network
/// and holds it until the response is classified. `tokio::sync::Mutex` hands
/// the slot out in request order, so concurrent callers are served FIFO.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialProvider>,
    settings: AssistantSettings,
    slot: Mutex<()>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialProvider>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            transport,
            credentials,
            settings,
            slot: Mutex::new(()),
        }
    }

    pub async fn query(
        &self,
        prompt: &str,
        context: Option<&PageContext>,
    ) -> AssistantResult<QueryResponse> {
        let _slot = self.slot.lock().await;

        let credential = self
            .credentials
            .credential()
            .await?
            .ok_or(AssistantError::NotConfigured)?;

        let request = MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: compose_prompt(prompt, context),
            }],
        };

        tracing::debug!(model = %request.model, with_context = context.is_some(), "sending messages request");
        let raw = self.dispatch(&credential, &request).await?;
        let body: MessagesResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            AssistantError::UpstreamError {
                status: 200,
                body: format!("unexpected response shape: {}", e),
            }
        })?;
        let text = body
            .content
            .into_iter()
            .find_map(|block| block.text)
            .unwrap_or_default();
        Ok(QueryResponse { text, raw })
    }

    /// Minimal check request for credential validation. Bypasses the query
    /// slot so it never waits behind chat traffic.
    pub async fn verify(&self, raw_credential: &str) -> AssistantResult<()> {
        let credential = Credential::parse(raw_credential)?;
        let request = MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.verify_max_tokens,
            temperature: None,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: VERIFY_PROMPT.to_string(),
            }],
        };
        self.dispatch(&credential, &request).await?;
        tracing::info!(key = %credential.masked(), "credential verified");
        Ok(())
    }

    async fn dispatch(
        &self,
        credential: &Credential,
        request: &MessagesRequest,
    ) -> AssistantResult<Value> {
        let body = serde_json::to_value(request)
            .map_err(|e| AssistantError::InvalidRequest(e.to_string()))?;
        let outbound = OutboundRequest {
            url: self.settings.endpoint.clone(),
            headers: request_headers(credential, &self.settings.api_version),
            body,
        };

        let resp = self.transport.post(outbound).await.map_err(|e| {
            tracing::error!(error = %e, "messages request failed in transit");
            AssistantError::TransportError(e.to_string())
        })?;
        tracing::debug!(status = resp.status, "messages response");
        classify(resp)
    }
}

/// Exactly one auth header, chosen by the credential prefix.
pub fn request_headers(credential: &Credential, api_version: &str) -> Vec<(&'static str, String)> {
    let scheme = credential.scheme();
    tracing::debug!(?scheme, "selected auth scheme");
    vec![
        ("Content-Type", "application/json".to_string()),
        ("anthropic-version", api_version.to_string()),
        scheme.header(credential),
    ]
}

/// The user message content, with the page rendered ahead of the question
/// when a context is supplied.
pub fn compose_prompt(prompt: &str, context: Option<&PageContext>) -> String {
    let Some(context) = context else {
        return prompt.to_string();
    };
    let or_missing = |s: &str| {
        if s.trim().is_empty() {
            "Not provided".to_string()
        } else {
            s.to_string()
        }
    };
    format!(
        "Current webpage content:\n{}\n\nURL: {}\nTitle: {}\n\nUser question: {}",
        context.text,
        or_missing(&context.url),
        or_missing(&context.title),
        prompt
    )
}

fn classify(resp: TransportResponse) -> AssistantResult<Value> {
    if resp.status == 401 {
        tracing::warn!("messages API rejected the credential");
        return Err(AssistantError::AuthenticationFailed);
    }
    if !resp.is_success() {
        let detail: String = resp.body.chars().take(800).collect();
        tracing::error!(status = resp.status, body = %detail, "messages API error");
        return Err(AssistantError::UpstreamError {
            status: resp.status,
            body: detail,
        });
    }
    serde_json::from_str(&resp.body).map_err(|e| AssistantError::UpstreamError {
        status: resp.status,
        body: format!("unreadable response body: {}", e),
    })
}
