use cm_events::names::TAB_CHANGED;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::document::DomError;
use crate::host::WidgetHost;
use crate::html::escape;
use crate::widget::{Widget, WidgetContext, WidgetError, WidgetFactory, WidgetOptions};

pub const ACTIVE_CLASS: &str = "active";
pub const HIDDEN_CLASS: &str = "hidden";
pub const PANEL_CLASS: &str = "tab-panel";

#[derive(Debug, Error)]
pub enum TabError {
    #[error("unknown tab `{0}`")]
    UnknownTab(String),
    #[error("tab container has been destroyed")]
    Destroyed,
    #[error(transparent)]
    Dom(#[from] DomError),
}

/// A tab the container can show. The widget is built on first activation.
#[derive(Clone)]
pub struct TabDefinition {
    pub id: String,
    pub title: String,
    pub icon: String,
    pub factory: WidgetFactory,
    pub options: WidgetOptions,
}

impl TabDefinition {
    pub fn new<F>(id: &str, title: &str, factory: F) -> Self
    where
        F: Fn(&WidgetContext) -> Box<dyn Widget> + Send + Sync + 'static,
    {
        Self {
            id: id.to_owned(),
            title: title.to_owned(),
            icon: String::new(),
            factory: Arc::new(factory),
            options: WidgetOptions::default(),
        }
    }

    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = icon.to_owned();
        self
    }

    pub fn with_options(mut self, options: WidgetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn info(&self) -> TabInfo {
        TabInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            icon: self.icon.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabInfo {
    pub id: String,
    pub title: String,
    pub icon: String,
}

pub type CreatedHook = Arc<dyn Fn(&Arc<WidgetHost>) + Send + Sync>;

#[derive(Default)]
struct TabState {
    tabs: Vec<TabDefinition>,
    current: Option<String>,
}

fn state(state: &Mutex<TabState>) -> MutexGuard<'_, TabState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn panel_id(tab: &str) -> String {
    format!("tab-panel-{tab}")
}

/// Title strip rendered into the container itself; tab panels are child
/// elements next to it.
struct TabStrip {
    state: Arc<Mutex<TabState>>,
}

impl Widget for TabStrip {
    fn name(&self) -> &str {
        "Tabs"
    }

    fn render(&self, _ctx: &WidgetContext) -> Result<String, WidgetError> {
        let st = state(&self.state);
        let current = st
            .current
            .as_deref()
            .and_then(|id| st.tabs.iter().find(|t| t.id == id));
        Ok(match current {
            Some(tab) => format!(
                r#"<header class="tab-header"><span class="tab-icon">{}</span><h2>{}</h2></header>"#,
                escape(&tab.icon),
                escape(&tab.title)
            ),
            None => r#"<header class="tab-header"></header>"#.to_owned(),
        })
    }
}

/// Switches between lazily built tab widgets. Every tab widget is a child
/// of the container's host, so destroying the container destroys them all.
pub struct TabContainer {
    host: Arc<WidgetHost>,
    state: Arc<Mutex<TabState>>,
    switching: AsyncMutex<()>,
    on_created: Option<CreatedHook>,
}

impl TabContainer {
    pub fn new(
        container_id: &str,
        ctx: WidgetContext,
        tabs: Vec<TabDefinition>,
        on_created: Option<CreatedHook>,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(TabState {
            tabs,
            current: None,
        }));
        let strip = TabStrip {
            state: state.clone(),
        };
        let host = WidgetHost::new(
            container_id,
            strip,
            ctx,
            WidgetOptions::default().with_class("tab-container"),
        );
        Arc::new(Self {
            host,
            state,
            switching: AsyncMutex::new(()),
            on_created,
        })
    }

    pub fn host(&self) -> &Arc<WidgetHost> {
        &self.host
    }

    pub async fn initialize(&self) -> Result<(), WidgetError> {
        self.host.initialize().await
    }

    pub fn tabs(&self) -> Vec<TabInfo> {
        state(&self.state).tabs.iter().map(TabDefinition::info).collect()
    }

    /// Register `tab`, replacing an existing definition with the same id.
    pub fn add_tab(&self, tab: TabDefinition) {
        let mut st = state(&self.state);
        match st.tabs.iter_mut().find(|t| t.id == tab.id) {
            Some(existing) => *existing = tab,
            None => st.tabs.push(tab),
        }
    }

    pub fn current_tab(&self) -> Option<String> {
        state(&self.state).current.clone()
    }

    /// Live widget for `tab`, if it has been built and not destroyed.
    pub fn tab_widget(&self, tab: &str) -> Option<Arc<WidgetHost>> {
        self.host.child(tab).filter(|w| !w.is_destroyed())
    }

    /// Activate `tab`, building its widget on first use. Returns `false`
    /// when `tab` was already active.
    ///
    /// A widget that fails to initialize stays mounted with its inline
    /// error; the switch itself still succeeds.
    pub async fn show_tab(&self, tab: &str) -> Result<bool, TabError> {
        let _switching = self.switching.lock().await;
        if self.host.is_destroyed() {
            return Err(TabError::Destroyed);
        }

        let (definition, previous) = {
            let st = state(&self.state);
            let definition = st
                .tabs
                .iter()
                .find(|t| t.id == tab)
                .cloned()
                .ok_or_else(|| TabError::UnknownTab(tab.to_owned()))?;
            (definition, st.current.clone())
        };
        let existing = self.tab_widget(tab);
        if previous.as_deref() == Some(tab) && existing.is_some() {
            debug!(tab, "tab already active");
            return Ok(false);
        }

        let ctx = self.host.context().clone();
        let doc = &ctx.document;
        if let Some(prev) = previous.as_deref().filter(|p| *p != tab) {
            let prev_panel = panel_id(prev);
            let _ = doc.remove_class(&prev_panel, ACTIVE_CLASS);
            let _ = doc.add_class(&prev_panel, HIDDEN_CLASS);
        }

        let panel = panel_id(tab);
        if !doc.contains(&panel) {
            doc.create_element(&panel, Some(self.host.id()))?;
            doc.add_class(&panel, PANEL_CLASS)?;
        }
        doc.remove_class(&panel, HIDDEN_CLASS)?;
        doc.add_class(&panel, ACTIVE_CLASS)?;

        state(&self.state).current = Some(tab.to_owned());
        ctx.store.set_current_tab(tab);
        let _ = self.host.render().await;

        if existing.is_none() {
            let widget = (definition.factory)(&ctx);
            let child = WidgetHost::from_boxed(&panel, widget, ctx.clone(), definition.options);
            self.host.add_child(tab, child.clone());
            if let Some(hook) = &self.on_created {
                hook(&child);
            }
            if let Err(err) = child.initialize().await {
                warn!(tab, "tab widget failed to initialize: {err}");
            }
        }

        ctx.bus.publish(TAB_CHANGED, json!({ "tab": tab, "previous": previous }));
        Ok(true)
    }

    pub fn destroy(&self) {
        self.host.destroy();
        state(&self.state).current = None;
    }
}
