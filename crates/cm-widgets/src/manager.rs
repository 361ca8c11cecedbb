//! Application shell: owns the tab container, keeps a registry of live
//! widgets and fans app-wide operations out to them.

use cm_events::names::{APP_NOTIFICATION, APP_REFRESH, WIDGET_DESTROYED, WIDGET_ERROR};
use cm_events::{BusEvent, ListenerId};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::document::{DomError, DomListenerId, ListenerTarget};
use crate::host::WidgetHost;
use crate::html::escape;
use crate::tabs::{CreatedHook, TabContainer, TabDefinition, TabError, TabInfo};
use crate::widget::{Widget, WidgetContext, WidgetError, WidgetOptions};

pub const APP_CONTAINER: &str = "app-container";
pub const APP_HEADER: &str = "app-header";
pub const APP_NAV: &str = "app-nav";
pub const TAB_CONTAINER: &str = "tab-container";
pub const MODAL_CONTAINER: &str = "modal-container";
pub const NOTIFICATION_CONTAINER: &str = "notification-container";

const SHELL: [&str; 5] = [
    APP_HEADER,
    APP_NAV,
    TAB_CONTAINER,
    MODAL_CONTAINER,
    NOTIFICATION_CONTAINER,
];
const MAX_NOTIFICATIONS: usize = 5;
const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Initialized,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("widget manager is not initialized")]
    NotInitialized,
    #[error("no tab is active")]
    NoActiveTab,
    #[error(transparent)]
    Tab(#[from] TabError),
    #[error(transparent)]
    Widget(#[from] WidgetError),
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: String,
    pub message: String,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modal {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WidgetStats {
    pub active: usize,
    pub initialized: usize,
    pub loading: usize,
    /// Every registration since construction, destroyed ones included.
    pub registered_total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub widget: String,
    pub error: WidgetError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub attempted: usize,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

pub struct WidgetManager {
    ctx: WidgetContext,
    title: String,
    notification_ttl: Option<Duration>,
    state: Mutex<ManagerState>,
    tab_defs: Mutex<Vec<TabDefinition>>,
    tabs: Mutex<Option<Arc<TabContainer>>>,
    registry: Mutex<BTreeMap<String, Arc<WidgetHost>>>,
    registered: AtomicUsize,
    bus_listeners: Mutex<Vec<ListenerId>>,
    dom_listeners: Mutex<Vec<DomListenerId>>,
    notifications: Mutex<Vec<Notification>>,
    modal: Mutex<Option<Modal>>,
    me: Weak<WidgetManager>,
}

impl WidgetManager {
    pub fn new(ctx: WidgetContext, title: &str) -> Arc<Self> {
        Self::with_notification_ttl(ctx, title, Some(DEFAULT_NOTIFICATION_TTL))
    }

    /// `ttl` of `None` keeps notifications until dismissed.
    pub fn with_notification_ttl(ctx: WidgetContext, title: &str, ttl: Option<Duration>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ctx,
            title: title.to_owned(),
            notification_ttl: ttl,
            state: Mutex::new(ManagerState::Uninitialized),
            tab_defs: Mutex::new(Vec::new()),
            tabs: Mutex::new(None),
            registry: Mutex::new(BTreeMap::new()),
            registered: AtomicUsize::new(0),
            bus_listeners: Mutex::new(Vec::new()),
            dom_listeners: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            modal: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn context(&self) -> &WidgetContext {
        &self.ctx
    }

    pub fn state(&self) -> ManagerState {
        *lock(&self.state)
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ManagerState::Initialized
    }

    // ── Lifecycle ──

    /// Build the shell, mount the tab container and wire app-level events.
    /// A second call while initializing or initialized only logs a warning.
    pub async fn initialize(&self) -> Result<(), ManagerError> {
        {
            let mut state = lock(&self.state);
            if *state != ManagerState::Uninitialized {
                warn!(state = ?*state, "widget manager already initialized");
                return Ok(());
            }
            *state = ManagerState::Initializing;
        }

        match self.bring_up().await {
            Ok(()) => {
                *lock(&self.state) = ManagerState::Initialized;
                info!(tabs = self.tabs().len(), "widget manager initialized");
                Ok(())
            }
            Err(err) => {
                error!("widget manager failed to initialize: {err}");
                self.destroy_all();
                Err(err)
            }
        }
    }

    async fn bring_up(&self) -> Result<(), ManagerError> {
        self.build_shell()?;
        self.render_header();

        let on_created: CreatedHook = {
            let me = self.me.clone();
            Arc::new(move |host: &Arc<WidgetHost>| {
                if let Some(manager) = me.upgrade() {
                    manager.register(host.clone());
                }
            })
        };
        let defs = lock(&self.tab_defs).clone();
        let tabs = TabContainer::new(TAB_CONTAINER, self.ctx.clone(), defs, Some(on_created));
        self.register(tabs.host().clone());
        tabs.initialize().await?;
        *lock(&self.tabs) = Some(tabs);

        self.bind_app_events();
        self.render_nav();
        Ok(())
    }

    /// Create the shell elements unless an `app-container` already exists.
    fn build_shell(&self) -> Result<bool, DomError> {
        let doc = &self.ctx.document;
        if doc.contains(APP_CONTAINER) {
            debug!("app shell already present");
            for id in SHELL {
                if !doc.contains(id) {
                    doc.create_element(id, Some(APP_CONTAINER))?;
                }
            }
            return Ok(false);
        }
        doc.create_element(APP_CONTAINER, None)?;
        for id in SHELL {
            doc.create_element(id, Some(APP_CONTAINER))?;
        }
        Ok(true)
    }

    fn bind_app_events(&self) {
        let bus = &self.ctx.bus;
        let mut bus_ids = Vec::new();

        let me = self.me.clone();
        bus_ids.push(bus.on_global(WIDGET_DESTROYED, move |event: &BusEvent| {
            if let (Some(manager), Some(source)) = (me.upgrade(), event.source.as_deref()) {
                manager.evict(source);
            }
            Ok(())
        }));

        let me = self.me.clone();
        bus_ids.push(bus.on_global(WIDGET_ERROR, move |event: &BusEvent| {
            if let Some(manager) = me.upgrade() {
                let widget = event.payload["widget"].as_str().unwrap_or("Widget");
                let message = event.payload["error"].as_str().unwrap_or("unknown error");
                manager.show_notification(&format!("{widget}: {message}"), NotificationKind::Error);
            }
            Ok(())
        }));

        let me = self.me.clone();
        bus_ids.push(bus.on_global(APP_REFRESH, move |_: &BusEvent| {
            if let Some(manager) = me.upgrade() {
                tokio::runtime::Handle::try_current()?.spawn(async move {
                    manager.refresh_all_widgets().await;
                });
            }
            Ok(())
        }));
        lock(&self.bus_listeners).extend(bus_ids);

        let doc = &self.ctx.document;
        let mut dom_ids = Vec::new();

        let me = self.me.clone();
        dom_ids.push(doc.add_listener(
            ListenerTarget::Element(APP_NAV.to_owned()),
            "click",
            None,
            move |event| {
                let (Some(manager), Some(tab)) = (me.upgrade(), event.attr("tab")) else {
                    return Ok(());
                };
                let tab = tab.to_owned();
                tokio::runtime::Handle::try_current()?.spawn(async move {
                    if let Err(err) = manager.show_tab(&tab).await {
                        warn!(%tab, "tab switch failed: {err}");
                    }
                });
                Ok(())
            },
        ));

        let me = self.me.clone();
        dom_ids.push(doc.add_listener(
            ListenerTarget::Element(NOTIFICATION_CONTAINER.to_owned()),
            "click",
            None,
            move |event| {
                if let (Some(manager), Some(id)) = (me.upgrade(), event.attr("dismiss")) {
                    manager.dismiss_notification(id);
                }
                Ok(())
            },
        ));

        let me = self.me.clone();
        dom_ids.push(doc.add_listener(
            ListenerTarget::Element(MODAL_CONTAINER.to_owned()),
            "click",
            None,
            move |event| {
                if event.attr("action") == Some("close-modal") {
                    if let Some(manager) = me.upgrade() {
                        manager.close_modal();
                    }
                }
                Ok(())
            },
        ));

        let me = self.me.clone();
        dom_ids.push(doc.add_listener(ListenerTarget::Document, "keydown", None, move |event| {
            if event.attr("key") == Some("Escape") {
                if let Some(manager) = me.upgrade() {
                    manager.close_modal();
                }
            }
            Ok(())
        }));
        lock(&self.dom_listeners).extend(dom_ids);
    }

    /// Destroy every widget, drop the shell and return to the
    /// uninitialized state.
    pub fn destroy_all(&self) {
        let hosts: Vec<Arc<WidgetHost>> = lock(&self.registry).values().cloned().collect();
        for host in &hosts {
            host.destroy();
        }
        let tabs = lock(&self.tabs).take();
        if let Some(tabs) = tabs {
            tabs.destroy();
        }
        lock(&self.registry).clear();

        let bus_ids = std::mem::take(&mut *lock(&self.bus_listeners));
        for id in bus_ids {
            self.ctx.bus.off(id);
        }
        let dom_ids = std::mem::take(&mut *lock(&self.dom_listeners));
        for id in dom_ids {
            self.ctx.document.remove_listener(id);
        }

        lock(&self.notifications).clear();
        *lock(&self.modal) = None;
        if self.ctx.document.contains(APP_CONTAINER) {
            let _ = self.ctx.document.remove_element(APP_CONTAINER);
        }
        *lock(&self.state) = ManagerState::Uninitialized;
        info!(destroyed = hosts.len(), "all widgets destroyed");
    }

    // ── Registry ──

    pub fn register(&self, host: Arc<WidgetHost>) {
        self.registered.fetch_add(1, Ordering::Relaxed);
        let replaced = lock(&self.registry).insert(host.id().to_owned(), host.clone());
        if let Some(old) = replaced.filter(|old| !Arc::ptr_eq(old, &host)) {
            debug!(widget = old.id(), "replacing registered widget");
            old.destroy();
        }
    }

    fn evict(&self, id: &str) {
        let mut registry = lock(&self.registry);
        if registry.get(id).is_some_and(|host| host.is_destroyed()) {
            registry.remove(id);
            debug!(widget = id, "widget evicted from registry");
        }
    }

    /// Wrap `widget` in a host on `container_id` and register it. The caller
    /// decides when to initialize.
    pub fn create_widget<W: Widget>(
        &self,
        container_id: &str,
        widget: W,
        options: WidgetOptions,
    ) -> Arc<WidgetHost> {
        let host = WidgetHost::new(container_id, widget, self.ctx.clone(), options);
        self.register(host.clone());
        host
    }

    /// [`WidgetManager::create_widget`] followed by `initialize`.
    pub async fn mount_widget<W: Widget>(
        &self,
        container_id: &str,
        widget: W,
        options: WidgetOptions,
    ) -> Result<Arc<WidgetHost>, WidgetError> {
        let host = self.create_widget(container_id, widget, options);
        host.initialize().await?;
        Ok(host)
    }

    pub fn get_widget(&self, id: &str) -> Option<Arc<WidgetHost>> {
        lock(&self.registry).get(id).cloned()
    }

    pub fn active_widgets(&self) -> Vec<String> {
        lock(&self.registry).keys().cloned().collect()
    }

    pub fn widget_stats(&self) -> WidgetStats {
        let registry = lock(&self.registry);
        WidgetStats {
            active: registry.len(),
            initialized: registry.values().filter(|w| w.is_initialized()).count(),
            loading: registry.values().filter(|w| w.is_loading()).count(),
            registered_total: self.registered.load(Ordering::Relaxed),
        }
    }

    // ── Tabs ──

    /// Add a tab. Tabs registered after `initialize` are added to the live
    /// container.
    pub fn register_tab(&self, tab: TabDefinition) {
        let live = lock(&self.tabs).clone();
        {
            let mut defs = lock(&self.tab_defs);
            match defs.iter_mut().find(|t| t.id == tab.id) {
                Some(existing) => *existing = tab.clone(),
                None => defs.push(tab.clone()),
            }
        }
        if let Some(tabs) = live {
            tabs.add_tab(tab);
            self.render_nav();
        }
    }

    pub fn tabs(&self) -> Vec<TabInfo> {
        lock(&self.tab_defs).iter().map(TabDefinition::info).collect()
    }

    fn tab_container(&self) -> Result<Arc<TabContainer>, ManagerError> {
        if !self.is_initialized() {
            return Err(ManagerError::NotInitialized);
        }
        lock(&self.tabs).clone().ok_or(ManagerError::NotInitialized)
    }

    pub async fn show_tab(&self, tab: &str) -> Result<bool, ManagerError> {
        let tabs = self.tab_container()?;
        let switched = tabs.show_tab(tab).await?;
        if switched {
            self.render_nav();
        }
        Ok(switched)
    }

    pub fn current_tab(&self) -> Option<String> {
        lock(&self.tabs).as_ref().and_then(|tabs| tabs.current_tab())
    }

    pub fn current_tab_widget(&self) -> Option<Arc<WidgetHost>> {
        let tabs = lock(&self.tabs).clone()?;
        tabs.tab_widget(&tabs.current_tab()?)
    }

    pub async fn refresh_current_tab(&self) -> Result<(), ManagerError> {
        self.tab_container()?;
        let widget = self.current_tab_widget().ok_or(ManagerError::NoActiveTab)?;
        widget.try_refresh().await?;
        Ok(())
    }

    /// Refresh every registered widget concurrently. One widget failing
    /// does not stop the others; each failure is logged and reported.
    pub async fn refresh_all_widgets(&self) -> RefreshReport {
        let targets: Vec<Arc<WidgetHost>> = lock(&self.registry)
            .values()
            .filter(|w| !w.is_destroyed())
            .cloned()
            .collect();

        let mut pending: Vec<String> = targets.iter().map(|w| w.id().to_owned()).collect();
        let mut report = RefreshReport {
            attempted: targets.len(),
            failures: Vec::new(),
        };

        let mut set = JoinSet::new();
        for host in targets {
            set.spawn(async move {
                let outcome = host.try_refresh().await;
                (host.id().to_owned(), outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    pending.retain(|p| p != &id);
                    if let Err(err) = outcome {
                        error!(widget = %id, "refresh failed: {err}");
                        report.failures.push(RefreshFailure { widget: id, error: err });
                    }
                }
                Err(join_err) => error!("refresh task did not complete: {join_err}"),
            }
        }
        // Tasks that panicked never reported back.
        for id in pending {
            report.failures.push(RefreshFailure {
                error: WidgetError::DataLoad("refresh task panicked".to_owned()),
                widget: id,
            });
        }

        info!(
            attempted = report.attempted,
            failed = report.failures.len(),
            "refreshed all widgets"
        );
        report
    }

    // ── Notifications & modal ──

    pub fn show_notification(&self, message: &str, kind: NotificationKind) -> String {
        let note = Notification {
            id: Uuid::new_v4().to_string(),
            message: message.to_owned(),
            kind,
        };
        {
            let mut notes = lock(&self.notifications);
            notes.push(note.clone());
            let overflow = notes.len().saturating_sub(MAX_NOTIFICATIONS);
            notes.drain(..overflow);
        }
        self.render_notifications();
        self.schedule_dismiss(&note.id);

        let payload = serde_json::to_value(&note).unwrap_or(Value::Null);
        self.ctx.bus.publish(APP_NOTIFICATION, payload);
        note.id
    }

    fn schedule_dismiss(&self, id: &str) {
        let Some(ttl) = self.notification_ttl else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let me = self.me.clone();
        let id = id.to_owned();
        runtime.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(manager) = me.upgrade() {
                manager.dismiss_notification(&id);
            }
        });
    }

    pub fn dismiss_notification(&self, id: &str) -> bool {
        let removed = {
            let mut notes = lock(&self.notifications);
            let before = notes.len();
            notes.retain(|n| n.id != id);
            notes.len() != before
        };
        if removed {
            self.render_notifications();
        }
        removed
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    pub fn show_modal(&self, title: &str, body_html: &str) {
        *lock(&self.modal) = Some(Modal {
            title: title.to_owned(),
            body: body_html.to_owned(),
        });
        let doc = &self.ctx.document;
        let markup = format!(
            r#"<div class="modal"><div class="modal-header"><h3>{}</h3><button class="modal-close" data-action="close-modal">&times;</button></div><div class="modal-body">{}</div></div>"#,
            escape(title),
            body_html
        );
        let _ = doc.set_content(MODAL_CONTAINER, &markup);
        let _ = doc.add_class(MODAL_CONTAINER, "open");
    }

    pub fn close_modal(&self) -> bool {
        let closed = lock(&self.modal).take().is_some();
        if closed {
            let doc = &self.ctx.document;
            let _ = doc.set_content(MODAL_CONTAINER, "");
            let _ = doc.remove_class(MODAL_CONTAINER, "open");
        }
        closed
    }

    pub fn modal(&self) -> Option<Modal> {
        lock(&self.modal).clone()
    }

    // ── Shell rendering ──

    fn render_header(&self) {
        let company = self.ctx.store.settings().company_name;
        let markup = format!(
            r#"<h1 class="app-title">{}</h1><span class="app-company">{}</span>"#,
            escape(&self.title),
            escape(&company)
        );
        let _ = self.ctx.document.set_content(APP_HEADER, &markup);
    }

    fn render_nav(&self) {
        let current = self.current_tab();
        let buttons: String = self
            .tabs()
            .iter()
            .map(|tab| {
                let active = if current.as_deref() == Some(tab.id.as_str()) {
                    " active"
                } else {
                    ""
                };
                format!(
                    r#"<button class="nav-tab{active}" data-tab="{id}"><span class="nav-icon">{icon}</span>{title}</button>"#,
                    id = escape(&tab.id),
                    icon = escape(&tab.icon),
                    title = escape(&tab.title),
                )
            })
            .collect();
        let _ = self
            .ctx
            .document
            .set_content(APP_NAV, &format!(r#"<nav class="tab-nav">{buttons}</nav>"#));
    }

    fn render_notifications(&self) {
        let markup: String = lock(&self.notifications)
            .iter()
            .map(|n| {
                let kind = match n.kind {
                    NotificationKind::Info => "info",
                    NotificationKind::Success => "success",
                    NotificationKind::Warning => "warning",
                    NotificationKind::Error => "error",
                };
                format!(
                    r#"<div class="notification notification-{kind}"><span>{}</span><button data-dismiss="{}">&times;</button></div>"#,
                    escape(&n.message),
                    n.id
                )
            })
            .collect();
        let _ = self.ctx.document.set_content(NOTIFICATION_CONTAINER, &markup);
    }
}
