pub mod credential;
pub mod error;
pub mod protocol;

pub use error::{AssistantError, AssistantResult, ErrorKind};

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::path::Path;
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct AssistantSettings {
        pub endpoint: String,         // messages endpoint
        pub api_version: String,      // value of the anthropic-version header
        pub model: String,            // e.g., "claude-3-sonnet-20240229"
        pub max_tokens: u32,
        pub temperature: Option<f32>,
        /// max_tokens for credential verification
        pub verify_max_tokens: u32,
        pub request_timeout_secs: u64,
        pub quota: u32,
        pub context_freshness_ms: u64,
        pub context_min_chars: usize,
        pub context_max_chars: usize,
        pub toggle_timeout_ms: u64,
        pub init_timeout_ms: u64,
    }

    impl Default for AssistantSettings {
        fn default() -> Self {
            Self {
                endpoint: "https://api.anthropic.com/v1/messages".into(),
                api_version: "2023-06-01".into(),
                model: "claude-3-sonnet-20240229".into(),
                max_tokens: 4096,
                temperature: Some(0.7),
                verify_max_tokens: 20,
                request_timeout_secs: 120,
                quota: 25,
                context_freshness_ms: 5_000,
                context_min_chars: 100,
                context_max_chars: 5_000,
                toggle_timeout_ms: 5_000,
                init_timeout_ms: 10_000,
            }
        }
    }

    impl AssistantSettings {
        /// Load from a JSON file; a missing file yields the defaults.
        pub fn load(path: &Path) -> anyhow::Result<Self> {
            if !path.exists() {
                return Ok(Self::default());
            }
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }

        pub fn toggle_timeout(&self) -> Duration {
            Duration::from_millis(self.toggle_timeout_ms)
        }

        pub fn init_timeout(&self) -> Duration {
            Duration::from_millis(self.init_timeout_ms)
        }

        pub fn context_freshness(&self) -> Duration {
            Duration::from_millis(self.context_freshness_ms)
        }
    }
}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // always "user" for this backend
        pub content: String,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ChatRole {
        User,
        Assistant,
        Error,
    }

    /// One transcript entry. Never mutated once appended.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ChatTurn {
        pub role: ChatRole,
        pub text: String,
    }

    impl ChatTurn {
        pub fn user(text: impl Into<String>) -> Self {
            Self {
                role: ChatRole::User,
                text: text.into(),
            }
        }

        pub fn assistant(text: impl Into<String>) -> Self {
            Self {
                role: ChatRole::Assistant,
                text: text.into(),
            }
        }

        pub fn error(text: impl Into<String>) -> Self {
            Self {
                role: ChatRole::Error,
                text: text.into(),
            }
        }
    }
}

pub mod page {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    /// Snapshot of the page attached to one query turn.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PageContext {
        pub url: String,
        pub title: String,
        pub text: String,
        pub selected_text: Option<String>,
        pub timestamp: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct WidgetPosition {
        pub x: f64,
        pub y: f64,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Size {
        pub width: f64,
        pub height: f64,
    }

    impl WidgetPosition {
        /// Top-right placement used when nothing was saved yet.
        pub fn default_for(viewport: Size) -> Self {
            Self {
                x: (viewport.width - 400.0).max(10.0),
                y: 50.0,
            }
        }

        /// Keep a box of `size` entirely inside `viewport`; pins to the
        /// top-left edge when the box is larger than the viewport.
        pub fn clamped(self, viewport: Size, size: Size) -> Self {
            Self {
                x: self.x.min(viewport.width - size.width).max(0.0),
                y: self.y.min(viewport.height - size.height).max(0.0),
            }
        }
    }
}

pub mod usage {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub enum CreditLevel {
        Normal,
        Warning,
        Depleted,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UsageSnapshot {
        pub usage: u32,
        pub remaining: u32,
        pub quota: u32,
    }

    impl UsageSnapshot {
        pub fn new(usage: u32, quota: u32) -> Self {
            Self {
                usage,
                remaining: quota.saturating_sub(usage),
                quota,
            }
        }

        pub fn level(&self) -> CreditLevel {
            match self.remaining {
                0 => CreditLevel::Depleted,
                1..=5 => CreditLevel::Warning,
                _ => CreditLevel::Normal,
            }
        }

        pub fn label(&self) -> String {
            format!("Credits: {} / {}", self.remaining, self.quota)
        }
    }
}

/// Durable storage keys shared by every context.
pub mod storage_keys {
    pub const CREDENTIAL: &str = "credential";
    pub const USAGE: &str = "ai_hover_usage";
    pub const POSITION: &str = "hover_box_position";
}

#[cfg(test)]
mod tests {
    use super::page::{Size, WidgetPosition};
    use super::settings::AssistantSettings;
    use super::usage::{CreditLevel, UsageSnapshot};
    use std::io::Write;

    #[test]
    fn test_clamp_to_viewport() {
        let viewport = Size {
            width: 1280.0,
            height: 800.0,
        };
        let size = Size {
            width: 380.0,
            height: 450.0,
        };
        let pos = WidgetPosition { x: 5000.0, y: 5000.0 }.clamped(viewport, size);
        assert_eq!(pos, WidgetPosition { x: 900.0, y: 350.0 });

        let pos = WidgetPosition { x: -40.0, y: -1.0 }.clamped(viewport, size);
        assert_eq!(pos, WidgetPosition { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_clamp_box_larger_than_viewport() {
        let viewport = Size {
            width: 300.0,
            height: 200.0,
        };
        let size = Size {
            width: 380.0,
            height: 450.0,
        };
        let pos = WidgetPosition { x: 50.0, y: 50.0 }.clamped(viewport, size);
        assert_eq!(pos, WidgetPosition { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_default_position() {
        let wide = Size {
            width: 1280.0,
            height: 800.0,
        };
        assert_eq!(WidgetPosition::default_for(wide), WidgetPosition { x: 880.0, y: 50.0 });
        let narrow = Size {
            width: 320.0,
            height: 800.0,
        };
        assert_eq!(WidgetPosition::default_for(narrow).x, 10.0);
    }

    #[test]
    fn test_credit_levels() {
        assert_eq!(UsageSnapshot::new(0, 25).level(), CreditLevel::Normal);
        assert_eq!(UsageSnapshot::new(20, 25).level(), CreditLevel::Warning);
        assert_eq!(UsageSnapshot::new(24, 25).level(), CreditLevel::Warning);
        assert_eq!(UsageSnapshot::new(25, 25).level(), CreditLevel::Depleted);
        assert_eq!(UsageSnapshot::new(40, 25).remaining, 0);
        assert_eq!(UsageSnapshot::new(3, 25).label(), "Credits: 22 / 25");
    }

    #[test]
    fn test_settings_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"quota": 10, "model": "claude-3-haiku-20240307"}}"#).unwrap();
        let settings = AssistantSettings::load(file.path()).unwrap();
        assert_eq!(settings.quota, 10);
        assert_eq!(settings.model, "claude-3-haiku-20240307");
        assert_eq!(settings.max_tokens, 4096);
    }

    #[test]
    fn test_settings_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AssistantSettings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.quota, 25);
        assert_eq!(settings.toggle_timeout().as_secs(), 5);
    }
}
