//! Runtime for the on-page chat assistant: widget, content side, tab
//! coordinator, background router and popup.

pub mod background;
pub mod content;
pub mod coordinator;
pub mod host;
pub mod popup;
pub mod surface;
pub mod widget;

#[cfg(test)]
mod testing;

pub use background::BackgroundService;
pub use content::{ContentScript, ServiceFactory, WidgetFactory};
pub use coordinator::{TabCoordinator, TabHost};
pub use host::LocalTabHost;
pub use popup::{PopupController, StatusBanner};
pub use widget::{HoverWidget, WidgetServices, WidgetState};
