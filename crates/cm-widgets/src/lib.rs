//! Headless widget framework.
//!
//! A [`Widget`] supplies data loading and rendering; a [`WidgetHost`] drives
//! it through initialize, refresh and destroy against a [`Document`].
//! [`TabContainer`] builds tab widgets on demand and [`WidgetManager`] ties
//! the whole shell together. Collaborators arrive through
//! [`WidgetContext`]; nothing here is global.

pub mod document;
mod host;
pub mod html;
mod manager;
mod tabs;
mod widget;

pub use document::{DomError, DomEvent, DomListenerId, Document, Element, ListenerTarget};
pub use host::{LOADING_CLASS, WIDGET_CLASS, WidgetHost};
pub use manager::{
    APP_CONTAINER, APP_HEADER, APP_NAV, MODAL_CONTAINER, ManagerError, ManagerState, Modal,
    NOTIFICATION_CONTAINER, Notification, NotificationKind, RefreshFailure, RefreshReport,
    TAB_CONTAINER, WidgetManager, WidgetStats,
};
pub use tabs::{
    ACTIVE_CLASS, CreatedHook, HIDDEN_CLASS, TabContainer, TabDefinition, TabError, TabInfo,
    panel_id,
};
pub use widget::{Widget, WidgetContext, WidgetError, WidgetFactory, WidgetOptions};
