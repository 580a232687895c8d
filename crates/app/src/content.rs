//! Per-tab content side: owns at most one widget and answers forwarded commands.

use crate::surface::{RenderSurface, WindowEvent};
use crate::widget::{HoverWidget, WidgetServices, WidgetState};
use serde_json::Value;
use shared::agent_api::ChatTurn;
use shared::protocol::{ContentCommand, Response};
use shared::settings::AssistantSettings;
use shared::{AssistantError, AssistantResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Builds the pieces a fresh widget needs. Called again whenever a disposed
/// widget has to be replaced.
pub trait WidgetFactory: Send + Sync {
    fn services(&self) -> WidgetServices;
    fn surface(&self) -> Box<dyn RenderSurface>;
}

/// Factory over a fixed service set and a surface constructor.
pub struct ServiceFactory<F> {
    services: WidgetServices,
    make_surface: F,
}

impl<F> ServiceFactory<F>
where
    F: Fn() -> Box<dyn RenderSurface> + Send + Sync,
{
    pub fn new(services: WidgetServices, make_surface: F) -> Self {
        Self {
            services,
            make_surface,
        }
    }
}

impl<F> WidgetFactory for ServiceFactory<F>
where
    F: Fn() -> Box<dyn RenderSurface> + Send + Sync,
{
    fn services(&self) -> WidgetServices {
        self.services.clone()
    }

    fn surface(&self) -> Box<dyn RenderSurface> {
        (self.make_surface)()
    }
}

pub struct ContentScript {
    factory: Arc<dyn WidgetFactory>,
    widget: Mutex<Option<HoverWidget>>,
    init_timeout: Duration,
    toggle_timeout: Duration,
}

impl ContentScript {
    pub fn new(factory: Arc<dyn WidgetFactory>, settings: &AssistantSettings) -> Self {
        Self {
            factory,
            widget: Mutex::new(None),
            init_timeout: settings.init_timeout(),
            toggle_timeout: settings.toggle_timeout(),
        }
    }

    /// Answer a raw protocol message. Always produces a response.
    pub async fn handle_value(&self, message: Value) -> Response {
        match ContentCommand::from_value(message) {
            Ok(command) => self.handle(command).await,
            Err(e) => {
                tracing::warn!(error = %e, "content side rejected message");
                Response::failure(&e)
            }
        }
    }

    pub async fn handle(&self, command: ContentCommand) -> Response {
        tracing::debug!(?command, "content side received command");
        match command {
            ContentCommand::Toggle => match self.toggle().await {
                Ok(visible) => Response::ok().with_status(if visible { "opened" } else { "closed" }),
                Err(e) => {
                    tracing::error!(error = %e, "toggle failed");
                    Response::failure(&e)
                }
            },
            ContentCommand::ProcessSelection { selected_text } => {
                match self.process_selection(&selected_text).await {
                    Ok(()) => Response::ok(),
                    Err(e) => {
                        tracing::error!(error = %e, "processing selection failed");
                        Response::failure(&e)
                    }
                }
            }
        }
    }

    async fn toggle(&self) -> AssistantResult<bool> {
        let mut slot = timeout(self.toggle_timeout, self.widget.lock())
            .await
            .map_err(|_| AssistantError::timeout("toggleHoverBox", self.toggle_timeout))?;
        let widget = self.ensure_widget(&mut slot).await?;

        let outcome = timeout(self.toggle_timeout, widget.toggle(None)).await;
        match outcome {
            Ok(Ok(visible)) => Ok(visible),
            Ok(Err(e)) => {
                *slot = None;
                Err(e)
            }
            Err(_) => {
                *slot = None;
                Err(AssistantError::timeout("toggleHoverBox", self.toggle_timeout))
            }
        }
    }

    async fn process_selection(&self, selected: &str) -> AssistantResult<()> {
        if selected.trim().is_empty() {
            return Err(AssistantError::InvalidRequest("No text selected".into()));
        }
        let mut slot = self.widget.lock().await;
        let widget = self.ensure_widget(&mut slot).await?;
        widget.process_selected_text(selected).await?;
        Ok(())
    }

    /// Type a message into the widget, opening it first.
    pub async fn send_message(&self, text: &str) -> AssistantResult<Option<ChatTurn>> {
        let mut slot = self.widget.lock().await;
        let widget = self.ensure_widget(&mut slot).await?;
        widget.show().await?;
        widget.send_message(text).await
    }

    /// Return the live widget, replacing a missing or disposed one. A widget
    /// that fails or times out during initialization is dropped, which
    /// disposes it.
    async fn ensure_widget<'a>(
        &self,
        slot: &'a mut Option<HoverWidget>,
    ) -> AssistantResult<&'a mut HoverWidget> {
        let live = matches!(
            slot.as_ref().map(HoverWidget::state),
            Some(WidgetState::Ready { .. })
        );
        if !live {
            *slot = None;
            tracing::debug!("creating hover widget");
            let pending = HoverWidget::create(self.factory.services(), self.factory.surface());
            let widget = match timeout(self.init_timeout, pending).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AssistantError::timeout(
                        "widget initialization",
                        self.init_timeout,
                    ))
                }
            };
            *slot = Some(widget);
        }
        slot.as_mut()
            .ok_or_else(|| AssistantError::Initialization("widget unavailable".into()))
    }

    /// Deliver a window-level event: a resize re-clamps the widget, an
    /// unload tears it down.
    pub async fn window_event(&self, event: WindowEvent) {
        tracing::debug!(?event, "window event");
        match event {
            WindowEvent::Resize => {
                if let Some(widget) = self.widget.lock().await.as_mut() {
                    widget.on_resize();
                }
            }
            WindowEvent::Unload => self.teardown().await,
        }
    }

    /// Page is going away: dispose the widget.
    pub async fn teardown(&self) {
        if let Some(mut widget) = self.widget.lock().await.take() {
            widget.dispose();
        }
    }

    pub async fn state(&self) -> Option<WidgetState> {
        self.widget.lock().await.as_ref().map(HoverWidget::state)
    }

    pub async fn is_visible(&self) -> bool {
        self.widget
            .lock()
            .await
            .as_ref()
            .is_some_and(HoverWidget::is_visible)
    }

    pub async fn transcript(&self) -> Vec<ChatTurn> {
        self.widget
            .lock()
            .await
            .as_ref()
            .map(|w| w.transcript().to_vec())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{reply, RecordingFactory, Rig, StubTransport};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use services::KeyValueStore;
    use shared::ErrorKind;

    fn script(factory: Arc<RecordingFactory>) -> ContentScript {
        ContentScript::new(factory, &AssistantSettings::default())
    }

    #[tokio::test]
    async fn test_toggle_reports_opened_then_closed() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let factory = Arc::new(RecordingFactory::new(rig.services.clone()));
        let content = script(factory.clone());

        let first = content.handle_value(json!({"action": "toggleHoverBox"})).await;
        assert_eq!(first, Response::ok().with_status("opened"));
        let second = content.handle(ContentCommand::Toggle).await;
        assert_eq!(second.status.as_deref(), Some("closed"));
        assert_eq!(factory.built(), 1);
    }

    #[tokio::test]
    async fn test_unknown_action_is_answered() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let content = script(Arc::new(RecordingFactory::new(rig.services.clone())));
        let resp = content.handle_value(json!({"action": "explode"})).await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Unknown action: explode"));
    }

    #[tokio::test]
    async fn test_failed_init_is_reported_and_retried_with_new_widget() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let factory = Arc::new(RecordingFactory::new(rig.services.clone()));
        factory.fail_next_mount();
        let content = script(factory.clone());

        let resp = content.handle(ContentCommand::Toggle).await;
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(ErrorKind::Initialization));
        assert_eq!(content.state().await, None);

        let resp = content.handle(ContentCommand::Toggle).await;
        assert_eq!(resp.status.as_deref(), Some("opened"));
        assert_eq!(factory.built(), 2);
    }

    struct StalledStore;

    #[async_trait]
    impl KeyValueStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: Value) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_timeout_fails_toggle() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let mut services = rig.services.clone();
        services.usage = Arc::new(services::UsageTracker::new(Arc::new(StalledStore)));
        let content = script(Arc::new(RecordingFactory::new(services)));

        let resp = content.handle(ContentCommand::Toggle).await;
        assert_eq!(resp.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(
            resp.error.as_deref(),
            Some("widget initialization timed out after 10000ms")
        );
        assert_eq!(content.state().await, None);
    }

    #[tokio::test]
    async fn test_empty_selection_is_rejected() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let factory = Arc::new(RecordingFactory::new(rig.services.clone()));
        let content = script(factory.clone());
        let resp = content
            .handle_value(json!({"action": "processSelection", "selectedText": "  "}))
            .await;
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Invalid request: No text selected"));
        assert_eq!(factory.built(), 0);
    }

    #[tokio::test]
    async fn test_selection_creates_shows_and_sends() {
        let transport = Arc::new(StubTransport::replying(vec![reply("Low water.")]));
        let rig = Rig::new(transport.clone()).await;
        let content = script(Arc::new(RecordingFactory::new(rig.services.clone())));

        let resp = content
            .handle(ContentCommand::ProcessSelection {
                selected_text: "ebbing tide".into(),
            })
            .await;
        assert_eq!(resp, Response::ok());
        assert!(content.is_visible().await);
        let transcript = content.transcript().await;
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1], ChatTurn::assistant("Low water."));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_teardown_disposes_and_next_toggle_rebuilds() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let factory = Arc::new(RecordingFactory::new(rig.services.clone()));
        let content = script(factory.clone());
        content.handle(ContentCommand::Toggle).await;
        content.teardown().await;
        assert_eq!(factory.logs()[0].lock().detached, 1);
        assert_eq!(content.state().await, None);

        let resp = content.handle(ContentCommand::Toggle).await;
        assert_eq!(resp.status.as_deref(), Some("opened"));
        assert_eq!(factory.built(), 2);
    }

    #[tokio::test]
    async fn test_window_resize_reclamps_open_widget_without_saving() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let factory = Arc::new(RecordingFactory::new(rig.services.clone()));
        let content = script(factory.clone());
        content.handle(ContentCommand::Toggle).await;

        let log = factory.logs()[0].clone();
        log.lock().viewport = Some(shared::page::Size {
            width: 600.0,
            height: 400.0,
        });
        content.window_event(WindowEvent::Resize).await;

        assert_eq!(
            log.lock().positions.last(),
            Some(&shared::page::WidgetPosition { x: 220.0, y: 0.0 })
        );
        assert!(content.is_visible().await);
        assert!(rig
            .storage
            .get(shared::storage_keys::POSITION)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_window_unload_disposes_widget() {
        let rig = Rig::new(Arc::new(StubTransport::default())).await;
        let factory = Arc::new(RecordingFactory::new(rig.services.clone()));
        let content = script(factory.clone());
        // Nothing to do before a widget exists
        content.window_event(WindowEvent::Resize).await;
        content.window_event(WindowEvent::Unload).await;
        assert_eq!(factory.built(), 0);

        content.handle(ContentCommand::Toggle).await;
        content.window_event(WindowEvent::Unload).await;
        let log = factory.logs()[0].clone();
        assert_eq!(log.lock().detached, 1);
        assert!(log.lock().active_listeners.is_empty());
        assert_eq!(content.state().await, None);
    }
}
