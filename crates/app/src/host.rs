//! In-process tab host: tabs are plain entries and "injecting" builds a
//! [`ContentScript`] for the tab.

use crate::content::{ContentScript, WidgetFactory};
use crate::coordinator::TabHost;
use crate::surface::WindowEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::protocol::{ContentCommand, Response, TabId};
use shared::settings::AssistantSettings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Tab {
    url: String,
    content: Option<Arc<ContentScript>>,
}

pub struct LocalTabHost {
    factory: Arc<dyn WidgetFactory>,
    settings: AssistantSettings,
    tabs: RwLock<HashMap<TabId, Tab>>,
    injections: AtomicUsize,
}

impl LocalTabHost {
    pub fn new(factory: Arc<dyn WidgetFactory>, settings: AssistantSettings) -> Self {
        Self {
            factory,
            settings,
            tabs: RwLock::new(HashMap::new()),
            injections: AtomicUsize::new(0),
        }
    }

    pub fn open_tab(&self, tab: TabId, url: impl Into<String>) {
        self.tabs.write().insert(
            tab,
            Tab {
                url: url.into(),
                content: None,
            },
        );
    }

    /// Close the tab; its content side sees an unload first.
    pub async fn close_tab(&self, tab: TabId) {
        self.window_event(tab, WindowEvent::Unload).await;
        self.tabs.write().remove(&tab);
    }

    /// Deliver a window-level event to the tab's content side, if any.
    pub async fn window_event(&self, tab: TabId, event: WindowEvent) {
        if let Some(content) = self.content(tab) {
            content.window_event(event).await;
        }
    }

    /// Content side of the tab, if injected.
    pub fn content(&self, tab: TabId) -> Option<Arc<ContentScript>> {
        self.tabs.read().get(&tab).and_then(|t| t.content.clone())
    }

    pub fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TabHost for LocalTabHost {
    async fn tab_url(&self, tab: TabId) -> anyhow::Result<Option<String>> {
        Ok(self.tabs.read().get(&tab).map(|t| t.url.clone()))
    }

    async fn inject(&self, tab: TabId) -> anyhow::Result<()> {
        let mut tabs = self.tabs.write();
        let entry = tabs
            .get_mut(&tab)
            .ok_or_else(|| anyhow::anyhow!("No tab with id: {}", tab))?;
        entry.content = Some(Arc::new(ContentScript::new(
            self.factory.clone(),
            &self.settings,
        )));
        self.injections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, tab: TabId, command: ContentCommand) -> anyhow::Result<Response> {
        let content = self.content(tab).ok_or_else(|| {
            anyhow::anyhow!("Could not establish connection. Receiving end does not exist.")
        })?;
        Ok(content.handle(command).await)
    }
}
