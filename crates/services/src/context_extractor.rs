//! Page-context capture with a short freshness cache.

use crate::page::PageSource;
use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use shared::page::PageContext;
use shared::settings::AssistantSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Main-content regions, tried in order.
pub const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    ".content",
    ".article-content",
    "#content",
    ".post-content",
];

pub const CAPTURE_ERROR_TEXT: &str = "Error capturing page content";

pub struct ContextExtractor {
    page: Arc<dyn PageSource>,
    freshness: Duration,
    min_chars: usize,
    max_chars: usize,
    cache: Mutex<Option<(Instant, PageContext)>>,
}

impl ContextExtractor {
    pub fn new(page: Arc<dyn PageSource>, settings: &AssistantSettings) -> Self {
        Self {
            page,
            freshness: settings.context_freshness(),
            min_chars: settings.context_min_chars,
            max_chars: settings.context_max_chars,
            cache: Mutex::new(None),
        }
    }

    /// Never fails: extraction problems yield a minimal context carrying
    /// [`CAPTURE_ERROR_TEXT`] so a send is never blocked by the page.
    pub fn capture(&self) -> PageContext {
        if let Some((taken, cached)) = self.cache.lock().as_ref() {
            if taken.elapsed() < self.freshness {
                tracing::debug!("using cached page context");
                return cached.clone();
            }
        }

        match self.extract() {
            Ok(context) => {
                tracing::debug!(url = %context.url, chars = context.text.len(), "captured page context");
                *self.cache.lock() = Some((Instant::now(), context.clone()));
                context
            }
            Err(e) => {
                tracing::warn!(error = %e, "page context capture failed");
                PageContext {
                    url: self.page.url(),
                    title: self.page.title(),
                    text: CAPTURE_ERROR_TEXT.to_string(),
                    selected_text: None,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    fn extract(&self) -> Result<PageContext> {
        let selection = self.page.selected_text();
        let (text, selected_text) = if selection.trim().is_empty() {
            (self.visible_content()?, None)
        } else {
            (selection.clone(), Some(selection))
        };

        Ok(PageContext {
            url: self.page.url(),
            title: self.page.title(),
            text: self.clean(&text),
            selected_text,
            timestamp: Utc::now(),
        })
    }

    fn visible_content(&self) -> Result<String> {
        for selector in CONTENT_SELECTORS {
            if let Some(text) = self.page.element_text(selector)? {
                if text.chars().count() > self.min_chars {
                    return Ok(text);
                }
            }
        }

        let paragraphs = self.page.paragraph_texts()?.join("\n\n");
        if paragraphs.chars().count() > self.min_chars {
            return Ok(paragraphs);
        }

        self.page.body_text()
    }

    fn clean(&self, text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(self.max_chars)
            .collect()
    }
}
