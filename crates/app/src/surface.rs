//! Rendering seam for the widget.
//!
//! A surface is an isolated rendering boundary: host-page styles never reach
//! it and its own styles never leak out. In a browser that is a closed shadow
//! root; the harness uses [`TerminalSurface`].

use shared::agent_api::{ChatRole, ChatTurn};
use shared::page::{Size, WidgetPosition};
use shared::usage::{CreditLevel, UsageSnapshot};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

/// Window-level events the widget subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEvent {
    Resize,
    Unload,
}

/// Handle returned by [`RenderSurface::listen`], needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub const BOX_SIZE: Size = Size {
    width: 380.0,
    height: 450.0,
};

pub trait RenderSurface: Send {
    /// Attach the boundary to the page.
    fn mount(&mut self) -> anyhow::Result<()>;
    fn viewport(&self) -> Size;
    fn box_size(&self) -> Size {
        BOX_SIZE
    }
    fn set_visible(&mut self, visible: bool);
    fn set_position(&mut self, position: WidgetPosition);
    fn append_turn(&mut self, turn: &ChatTurn);
    fn set_input_enabled(&mut self, enabled: bool);
    fn show_credits(&mut self, usage: &UsageSnapshot);
    fn listen(&mut self, event: WindowEvent) -> ListenerId;
    fn unlisten(&mut self, id: ListenerId);
    /// Remove the boundary from the page.
    fn detach(&mut self);
}

/// Virtual window size, shared between the harness and its surfaces.
pub type SharedViewport = Arc<RwLock<Size>>;

/// Prints the transcript to stdout over a virtual viewport.
pub struct TerminalSurface {
    viewport: SharedViewport,
    visible: bool,
    next_listener: u64,
    listeners: HashSet<ListenerId>,
}

impl TerminalSurface {
    pub fn new(viewport: SharedViewport) -> Self {
        Self {
            viewport,
            visible: false,
            next_listener: 0,
            listeners: HashSet::new(),
        }
    }

    fn print(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", line);
    }
}

impl RenderSurface for TerminalSurface {
    fn mount(&mut self) -> anyhow::Result<()> {
        tracing::debug!("terminal surface mounted");
        Ok(())
    }

    fn viewport(&self) -> Size {
        *self.viewport.read()
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.print(if visible {
            "── AI Assistant (open) ──"
        } else {
            "── AI Assistant (closed) ──"
        });
    }

    fn set_position(&mut self, position: WidgetPosition) {
        tracing::debug!(x = position.x, y = position.y, "widget positioned");
    }

    fn append_turn(&mut self, turn: &ChatTurn) {
        let prefix = match turn.role {
            ChatRole::User => "you",
            ChatRole::Assistant => "assistant",
            ChatRole::Error => "!",
        };
        self.print(&format!("{}> {}", prefix, turn.text));
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.print("… sending");
        }
    }

    fn show_credits(&mut self, usage: &UsageSnapshot) {
        if !self.visible {
            return;
        }
        let marker = match usage.level() {
            CreditLevel::Normal => "",
            CreditLevel::Warning => " (running low)",
            CreditLevel::Depleted => " (depleted)",
        };
        self.print(&format!("[{}{}]", usage.label(), marker));
    }

    fn listen(&mut self, event: WindowEvent) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        tracing::trace!(?event, ?id, "listener registered");
        self.listeners.insert(id);
        id
    }

    fn unlisten(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    fn detach(&mut self) {
        self.visible = false;
        self.listeners.clear();
        tracing::debug!("terminal surface detached");
    }
}
