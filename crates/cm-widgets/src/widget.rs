use async_trait::async_trait;
use cm_api_client::{Api, ApiClient, ApiError};
use cm_events::EventBus;
use cm_store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::document::Document;
use crate::host::WidgetHost;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WidgetError {
    #[error("container #{0} not found")]
    ContainerNotFound(String),
    #[error("failed to load data: {0}")]
    DataLoad(String),
    #[error("failed to render: {0}")]
    Render(String),
    #[error("failed to bind events: {0}")]
    Binding(String),
    #[error("event handler failed: {0}")]
    Handler(String),
    #[error("widget {0} is not initialized")]
    NotInitialized(String),
    #[error("widget {0} has been destroyed")]
    Destroyed(String),
}

impl WidgetError {
    pub fn kind(&self) -> &'static str {
        match self {
            WidgetError::ContainerNotFound(_) => "container_not_found",
            WidgetError::DataLoad(_) => "data_load",
            WidgetError::Render(_) => "render",
            WidgetError::Binding(_) => "binding",
            WidgetError::Handler(_) => "handler",
            WidgetError::NotInitialized(_) => "not_initialized",
            WidgetError::Destroyed(_) => "destroyed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, WidgetError::DataLoad(_) | WidgetError::Render(_))
    }
}

impl From<ApiError> for WidgetError {
    fn from(err: ApiError) -> Self {
        WidgetError::DataLoad(err.to_string())
    }
}

impl From<StoreError> for WidgetError {
    fn from(err: StoreError) -> Self {
        WidgetError::DataLoad(err.to_string())
    }
}

/// Everything a widget may touch, handed in at construction.
#[derive(Clone)]
pub struct WidgetContext {
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub document: Arc<Document>,
    pub api: Api,
}

impl WidgetContext {
    pub fn new(store: Arc<Store>, bus: Arc<EventBus>, document: Arc<Document>, api: Api) -> Self {
        Self {
            store,
            bus,
            document,
            api,
        }
    }

    /// Fresh in-memory store, bus and document around `client`.
    pub fn headless(client: Arc<dyn ApiClient>) -> Self {
        Self::new(
            Arc::new(Store::in_memory()),
            Arc::new(EventBus::new()),
            Arc::new(Document::new()),
            Api::new(client),
        )
    }
}

#[derive(Debug, Clone)]
pub struct WidgetOptions {
    /// Render right after the first successful load.
    pub auto_render: bool,
    /// Extra classes put on the container next to `widget`.
    pub class_names: Vec<String>,
    /// Periodic refresh, off when `None` or zero.
    pub refresh_interval: Option<Duration>,
}

impl Default for WidgetOptions {
    fn default() -> Self {
        Self {
            auto_render: true,
            class_names: Vec::new(),
            refresh_interval: None,
        }
    }
}

impl WidgetOptions {
    pub fn with_class(mut self, class: &str) -> Self {
        self.class_names.push(class.to_owned());
        self
    }

    /// A zero interval turns the timer off.
    pub fn with_refresh(mut self, every: Duration) -> Self {
        self.refresh_interval = Some(every).filter(|every| !every.is_zero());
        self
    }

    pub fn manual_render(mut self) -> Self {
        self.auto_render = false;
        self
    }
}

/// Hooks a concrete widget fills in. [`WidgetHost`] drives them through the
/// lifecycle: `load_data`, `render`, `on_after_render` on every pass and
/// `bind_events` once, after the first successful load.
///
/// Listeners registered through the host in `bind_events` are attached to
/// the container, so they survive re-renders and are detached on destroy.
#[async_trait]
pub trait Widget: Send + Sync + 'static {
    /// Human-readable name, used in logs and the inline error block.
    fn name(&self) -> &str {
        "Widget"
    }

    async fn load_data(&mut self, _ctx: &WidgetContext) -> Result<(), WidgetError> {
        Ok(())
    }

    fn render(&self, ctx: &WidgetContext) -> Result<String, WidgetError>;

    fn on_after_render(&mut self, _host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        Ok(())
    }

    fn bind_events(&mut self, _host: &Arc<WidgetHost>) -> Result<(), WidgetError> {
        Ok(())
    }

    fn on_destroy(&mut self) {}
}

pub type WidgetFactory = Arc<dyn Fn(&WidgetContext) -> Box<dyn Widget> + Send + Sync>;
