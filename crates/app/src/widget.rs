//! The in-page chat widget.
//!
//! Lifecycle: `Uninitialized → Initializing → Ready { visible } → Disposed`.
//! A failed initialization disposes the widget and reports the error to the
//! caller that asked for it; a disposed widget is never revived, the content
//! side builds a new one instead.

use crate::surface::{ListenerId, RenderSurface, WindowEvent};
use futures::FutureExt;
use providers::{ApiClient, QueryResponse};
use services::{ContextExtractor, KeyValueStore, UsageTracker};
use shared::agent_api::ChatTurn;
use shared::page::WidgetPosition;
use shared::storage_keys;
use shared::{AssistantError, AssistantResult};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetState {
    Uninitialized,
    Initializing,
    Ready { visible: bool },
    Disposed,
}

/// Services the widget drives on every send.
#[derive(Clone)]
pub struct WidgetServices {
    pub api: Arc<ApiClient>,
    pub context: Arc<ContextExtractor>,
    pub usage: Arc<UsageTracker>,
    pub storage: Arc<dyn KeyValueStore>,
}

pub struct HoverWidget {
    state: WidgetState,
    surface: Box<dyn RenderSurface>,
    services: Option<WidgetServices>,
    transcript: Vec<ChatTurn>,
    position: WidgetPosition,
    /// Pointer offset from the box origin while a drag is in progress
    drag_offset: Option<(f64, f64)>,
    listeners: Vec<ListenerId>,
    input_enabled: bool,
    mounted: bool,
}

impl HoverWidget {
    pub fn new(services: WidgetServices, surface: Box<dyn RenderSurface>) -> Self {
        Self {
            state: WidgetState::Uninitialized,
            surface,
            services: Some(services),
            transcript: Vec::new(),
            position: WidgetPosition { x: 20.0, y: 20.0 },
            drag_offset: None,
            listeners: Vec::new(),
            input_enabled: true,
            mounted: false,
        }
    }

    /// Build and initialize in one step.
    pub async fn create(
        services: WidgetServices,
        surface: Box<dyn RenderSurface>,
    ) -> AssistantResult<Self> {
        let mut widget = Self::new(services, surface);
        widget.initialize().await?;
        Ok(widget)
    }

    pub async fn initialize(&mut self) -> AssistantResult<()> {
        if self.state != WidgetState::Uninitialized {
            return Err(AssistantError::Initialization(format!(
                "widget cannot initialize from {:?}",
                self.state
            )));
        }
        self.state = WidgetState::Initializing;
        tracing::info!("initializing hover widget");

        match self.bring_up().await {
            Ok(()) => {
                self.state = WidgetState::Ready { visible: false };
                tracing::info!("hover widget ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "hover widget initialization failed");
                self.dispose();
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self) -> AssistantResult<()> {
        let services = self
            .services
            .clone()
            .ok_or_else(|| AssistantError::Initialization("services unavailable".into()))?;

        let usage = services.usage.get().await.map_err(|e| {
            AssistantError::Initialization(format!("usage tracker unavailable: {}", e))
        })?;

        self.surface
            .mount()
            .map_err(|e| AssistantError::Initialization(e.to_string()))?;
        self.mounted = true;

        for event in [WindowEvent::Resize, WindowEvent::Unload] {
            let id = self.surface.listen(event);
            self.listeners.push(id);
        }

        self.load_position(&services).await;
        self.surface.show_credits(&usage);
        Ok(())
    }

    pub fn state(&self) -> WidgetState {
        self.state
    }

    pub fn is_visible(&self) -> bool {
        matches!(self.state, WidgetState::Ready { visible: true })
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    pub fn position(&self) -> WidgetPosition {
        self.position
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    fn ready(&self) -> AssistantResult<bool> {
        match self.state {
            WidgetState::Ready { visible } => Ok(visible),
            other => Err(AssistantError::Initialization(format!(
                "widget is not ready ({:?})",
                other
            ))),
        }
    }

    /// Show, hide or flip visibility. Requesting the current state is a no-op.
    /// Returns the resulting visibility.
    pub async fn toggle(&mut self, force: Option<bool>) -> AssistantResult<bool> {
        let visible = self.ready()?;
        let target = force.unwrap_or(!visible);
        if target == visible {
            return Ok(visible);
        }

        self.surface.set_visible(target);
        self.state = WidgetState::Ready { visible: target };
        if target {
            self.refresh_credits().await;
        }
        tracing::debug!(visible = target, "hover widget toggled");
        Ok(target)
    }

    pub async fn show(&mut self) -> AssistantResult<bool> {
        self.toggle(Some(true)).await
    }

    pub async fn hide(&mut self) -> AssistantResult<bool> {
        self.toggle(Some(false)).await
    }

    /// One send cycle. Appends the user turn immediately, then exactly one
    /// assistant or error turn. Input is disabled for the duration and always
    /// re-enabled afterwards. Returns `None` when nothing was sent (blank text
    /// or input already disabled).
    pub async fn send_message(&mut self, text: &str) -> AssistantResult<Option<ChatTurn>> {
        self.ready()?;
        let message = text.trim();
        if message.is_empty() || !self.input_enabled {
            return Ok(None);
        }
        let services = self
            .services
            .clone()
            .ok_or_else(|| AssistantError::Initialization("services unavailable".into()))?;

        self.push_turn(ChatTurn::user(message));
        self.set_input_enabled(false);

        let outcome = AssertUnwindSafe(Self::run_query(&services, message))
            .catch_unwind()
            .await;

        let reply = match outcome {
            Ok(Ok(response)) => {
                let turn = ChatTurn::assistant(response.text);
                self.push_turn(turn.clone());
                self.record_usage(&services).await;
                turn
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "query failed");
                let turn = ChatTurn::error(format!("Error: {}", e));
                self.push_turn(turn.clone());
                turn
            }
            Err(_) => {
                tracing::error!("query panicked");
                let turn = ChatTurn::error("Error: unexpected failure while sending");
                self.push_turn(turn.clone());
                turn
            }
        };

        self.set_input_enabled(true);
        Ok(Some(reply))
    }

    /// Context-menu flow: show the widget and ask about the selection.
    pub async fn process_selected_text(&mut self, selected: &str) -> AssistantResult<Option<ChatTurn>> {
        let selected = selected.trim();
        if selected.is_empty() {
            return Err(AssistantError::InvalidRequest("No text selected".into()));
        }
        self.show().await?;
        self.send_message(&format!("Explain this selection:\n\n\"{}\"", selected))
            .await
    }

    async fn run_query(services: &WidgetServices, message: &str) -> AssistantResult<QueryResponse> {
        let context = services.context.capture();
        services.api.query(message, Some(&context)).await
    }

    async fn record_usage(&mut self, services: &WidgetServices) {
        match services.usage.increment().await {
            Ok(snapshot) => self.surface.show_credits(&snapshot),
            Err(e) => tracing::warn!(error = %e, "failed to record usage"),
        }
    }

    async fn refresh_credits(&mut self) {
        let Some(services) = self.services.clone() else {
            return;
        };
        match services.usage.get().await {
            Ok(snapshot) => self.surface.show_credits(&snapshot),
            Err(e) => tracing::warn!(error = %e, "error updating credits display"),
        }
    }

    fn push_turn(&mut self, turn: ChatTurn) {
        self.surface.append_turn(&turn);
        self.transcript.push(turn);
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
        self.surface.set_input_enabled(enabled);
    }

    async fn load_position(&mut self, services: &WidgetServices) {
        let saved = match services.storage.get(storage_keys::POSITION).await {
            Ok(Some(value)) => serde_json::from_value::<WidgetPosition>(value)
                .map_err(|e| tracing::warn!(error = %e, "ignoring malformed saved position"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "error loading saved position");
                None
            }
        };
        let viewport = self.surface.viewport();
        let position = saved.unwrap_or_else(|| WidgetPosition::default_for(viewport));
        self.apply_position(position);
    }

    async fn save_position(&mut self) {
        let Some(services) = self.services.clone() else {
            return;
        };
        let value = match serde_json::to_value(self.position) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "error encoding position");
                return;
            }
        };
        if let Err(e) = services.storage.set(storage_keys::POSITION, value).await {
            tracing::warn!(error = %e, "error saving position");
        }
    }

    fn apply_position(&mut self, position: WidgetPosition) {
        self.position = position.clamped(self.surface.viewport(), self.surface.box_size());
        self.surface.set_position(self.position);
    }

    /// Pointer pressed on the header at viewport coordinates.
    pub fn begin_drag(&mut self, pointer_x: f64, pointer_y: f64) {
        if self.ready().is_err() {
            return;
        }
        self.drag_offset = Some((pointer_x - self.position.x, pointer_y - self.position.y));
    }

    /// Pointer moved; the box follows, clamped to the viewport. Not persisted.
    pub fn drag_to(&mut self, pointer_x: f64, pointer_y: f64) {
        let Some((dx, dy)) = self.drag_offset else {
            return;
        };
        self.apply_position(WidgetPosition {
            x: pointer_x - dx,
            y: pointer_y - dy,
        });
    }

    /// Pointer released; the final position is persisted.
    pub async fn end_drag(&mut self) {
        if self.drag_offset.take().is_some() {
            self.save_position().await;
        }
    }

    /// Host window resized: re-clamp without persisting.
    pub fn on_resize(&mut self) {
        if self.mounted {
            self.apply_position(self.position);
        }
    }

    /// Release listeners, detach the surface and drop services. Safe to call
    /// repeatedly and at any point of the lifecycle.
    pub fn dispose(&mut self) {
        if self.state == WidgetState::Disposed {
            return;
        }
        for id in self.listeners.drain(..) {
            self.surface.unlisten(id);
        }
        if self.mounted {
            self.surface.detach();
            self.mounted = false;
        }
        self.services = None;
        self.transcript.clear();
        self.drag_offset = None;
        self.state = WidgetState::Disposed;
        tracing::info!("hover widget disposed");
    }
}

impl Drop for HoverWidget {
    fn drop(&mut self) {
        self.dispose();
    }
}
