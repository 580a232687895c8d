//! Cross-context message protocol.
//!
//! Every message is a JSON object with a string `action` discriminator and
//! every message gets exactly one [`Response`].

use crate::error::{AssistantError, AssistantResult, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Browser tab identifier
pub type TabId = u32;

/// Messages handled by the background coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    #[serde(rename = "validateAPIKey")]
    ValidateApiKey {
        /// Also call the remote API instead of only checking the format
        #[serde(default)]
        live: bool,
    },
    #[serde(rename = "updateAPIKey", rename_all = "camelCase")]
    UpdateApiKey {
        #[serde(default)]
        key_type: String,
        #[serde(default)]
        key: String,
    },
    #[serde(rename = "callAPI")]
    CallApi { model: String, prompt: String },
    #[serde(rename = "toggleHoverBox")]
    ToggleHoverBox,
    #[serde(rename = "processSelection", rename_all = "camelCase")]
    ProcessSelection { selected_text: String },
}

const REQUEST_ACTIONS: &[&str] = &[
    "validateAPIKey",
    "updateAPIKey",
    "callAPI",
    "toggleHoverBox",
    "processSelection",
];

/// Messages the background forwards into a tab's content side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ContentCommand {
    #[serde(rename = "toggleHoverBox")]
    Toggle,
    #[serde(rename = "processSelection", rename_all = "camelCase")]
    ProcessSelection { selected_text: String },
}

const CONTENT_ACTIONS: &[&str] = &["toggleHoverBox", "processSelection"];

fn decode<T: serde::de::DeserializeOwned>(value: Value, known: &[&str]) -> AssistantResult<T> {
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| AssistantError::InvalidRequest("missing action".into()))?;
    if !known.contains(&action) {
        return Err(AssistantError::UnknownAction(action.to_string()));
    }
    serde_json::from_value(value).map_err(|e| AssistantError::InvalidRequest(e.to_string()))
}

impl Request {
    pub fn from_value(value: Value) -> AssistantResult<Self> {
        decode(value, REQUEST_ACTIONS)
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::ValidateApiKey { .. } => "validateAPIKey",
            Request::UpdateApiKey { .. } => "updateAPIKey",
            Request::CallApi { .. } => "callAPI",
            Request::ToggleHoverBox => "toggleHoverBox",
            Request::ProcessSelection { .. } => "processSelection",
        }
    }
}

impl ContentCommand {
    pub fn from_value(value: Value) -> AssistantResult<Self> {
        decode(value, CONTENT_ACTIONS)
    }
}

/// The single reply every message receives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(err: &AssistantError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Default::default()
        }
    }

    pub fn validation(result: AssistantResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                valid: Some(true),
                ..Default::default()
            },
            Err(err) => Self {
                valid: Some(false),
                ..Self::failure(&err)
            },
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Convert back into a result, keeping the failure message.
    pub fn into_result(self) -> AssistantResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(AssistantError::Messaging(
                self.error.unwrap_or_else(|| "Unknown error occurred".into()),
            ))
        }
    }
}
