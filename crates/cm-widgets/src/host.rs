//! Lifecycle driver for a single mounted widget.

use cm_events::names::{
    WIDGET_DESTROYED, WIDGET_ERROR, WIDGET_INITIALIZED, WIDGET_REFRESHED, WIDGET_RENDERED,
};
use cm_events::{BusEvent, Dispatch, ListenOptions, ListenerId, Scope, panic_message};
use serde_json::{Value, json};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::document::{DomEvent, DomListenerId, FailureSink, ListenerTarget};
use crate::html;
use crate::widget::{Widget, WidgetContext, WidgetError, WidgetOptions};

pub const WIDGET_CLASS: &str = "widget";
pub const LOADING_CLASS: &str = "loading";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns one [`Widget`] mounted on a container element.
///
/// The host keeps the lifecycle flags, every listener the widget attached,
/// its child widgets and the refresh timer, so `destroy` can release all of
/// them synchronously. Async work that finishes after `destroy` is dropped.
pub struct WidgetHost {
    id: String,
    name: String,
    ctx: WidgetContext,
    options: WidgetOptions,
    widget: AsyncMutex<Box<dyn Widget>>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    loading: AtomicBool,
    mounted: AtomicBool,
    reporting: AtomicBool,
    destroy_hook_ran: AtomicBool,
    children: Mutex<Vec<(String, Arc<WidgetHost>)>>,
    dom_listeners: Mutex<Vec<DomListenerId>>,
    retry_listener: Mutex<Option<DomListenerId>>,
    bus_listeners: Mutex<Vec<ListenerId>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<WidgetError>>,
    me: Weak<WidgetHost>,
}

impl WidgetHost {
    pub fn new<W: Widget>(
        container_id: &str,
        widget: W,
        ctx: WidgetContext,
        options: WidgetOptions,
    ) -> Arc<Self> {
        Self::from_boxed(container_id, Box::new(widget), ctx, options)
    }

    pub fn from_boxed(
        container_id: &str,
        widget: Box<dyn Widget>,
        ctx: WidgetContext,
        options: WidgetOptions,
    ) -> Arc<Self> {
        let name = widget.name().to_owned();
        Arc::new_cyclic(|me| Self {
            id: container_id.to_owned(),
            name,
            ctx,
            options,
            widget: AsyncMutex::new(widget),
            initialized: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            mounted: AtomicBool::new(false),
            reporting: AtomicBool::new(false),
            destroy_hook_ran: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            dom_listeners: Mutex::new(Vec::new()),
            retry_listener: Mutex::new(None),
            bus_listeners: Mutex::new(Vec::new()),
            refresh_task: Mutex::new(None),
            last_error: Mutex::new(None),
            me: me.clone(),
        })
    }

    /// Container id, which doubles as the widget id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &WidgetContext {
        &self.ctx
    }

    pub fn options(&self) -> &WidgetOptions {
        &self.options
    }

    pub fn weak(&self) -> Weak<WidgetHost> {
        self.me.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<WidgetError> {
        lock(&self.last_error).clone()
    }

    /// Surface `err` like a failed load: inline block plus one
    /// `widget:error`.
    pub fn report_error(&self, err: &WidgetError) {
        self.handle_error(err);
    }

    // ── Lifecycle ──

    /// Resolve the container, load, render and bind events.
    ///
    /// A missing container or a failed load is reported (inline error block
    /// plus one `widget:error`) and returned to the caller. Render failures
    /// are shown inline and do not fail initialization.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), WidgetError> {
        if self.is_destroyed() {
            return Err(WidgetError::Destroyed(self.id.clone()));
        }
        let mut widget = self.widget.lock().await;
        if self.is_initialized() {
            warn!(widget = %self.id, "already initialized");
            return Ok(());
        }

        if !self.ctx.document.contains(&self.id) {
            let err = WidgetError::ContainerNotFound(self.id.clone());
            self.handle_error(&err);
            return Err(err);
        }
        self.mount();
        self.show_loading();

        let loaded = widget.load_data(&self.ctx).await;
        if self.is_destroyed() {
            self.run_destroy_hook(&mut widget);
            return Err(WidgetError::Destroyed(self.id.clone()));
        }
        self.finish_loading();
        if let Err(err) = loaded {
            self.handle_error(&err);
            return Err(err);
        }

        if self.options.auto_render {
            let _ = self.render_with(&mut widget);
        }

        if let Err(err) = widget.bind_events(self) {
            self.detach_widget_listeners();
            self.handle_error(&err);
            return Err(err);
        }

        self.initialized.store(true, Ordering::Release);
        self.start_refresh_timer();
        info!(widget = %self.id, name = %self.name, "widget initialized");
        self.emit(WIDGET_INITIALIZED, json!({ "widget": self.name }));
        Ok(())
    }

    /// Re-run `render` without reloading.
    pub async fn render(self: &Arc<Self>) -> Result<(), WidgetError> {
        let mut widget = self.widget.lock().await;
        self.render_with(&mut widget)
    }

    /// Reload and re-render, returning the failure if there was one. The
    /// failure has already been reported by the time it is returned.
    pub async fn try_refresh(self: &Arc<Self>) -> Result<(), WidgetError> {
        if self.is_destroyed() {
            return Err(WidgetError::Destroyed(self.id.clone()));
        }
        if !self.is_initialized() {
            return Err(WidgetError::NotInitialized(self.id.clone()));
        }

        let mut widget = self.widget.lock().await;
        if self.is_destroyed() {
            self.run_destroy_hook(&mut widget);
            return Err(WidgetError::Destroyed(self.id.clone()));
        }

        self.loading.store(true, Ordering::Release);
        let _ = self.ctx.document.add_class(&self.id, LOADING_CLASS);
        let loaded = widget.load_data(&self.ctx).await;
        if self.is_destroyed() {
            debug!(widget = %self.id, "discarding load that finished after destroy");
            self.run_destroy_hook(&mut widget);
            return Err(WidgetError::Destroyed(self.id.clone()));
        }
        self.finish_loading();
        if let Err(err) = loaded {
            self.handle_error(&err);
            return Err(err);
        }

        self.render_with(&mut widget)?;
        self.emit(WIDGET_REFRESHED, json!({ "widget": self.name }));
        Ok(())
    }

    /// Fire-and-forget flavour of [`WidgetHost::try_refresh`].
    pub async fn refresh(self: &Arc<Self>) {
        if let Err(err) = self.try_refresh().await {
            match err {
                WidgetError::Destroyed(_) | WidgetError::NotInitialized(_) => {
                    debug!(widget = %self.id, "refresh skipped: {err}")
                }
                _ => debug!(widget = %self.id, "refresh failed: {err}"),
            }
        }
    }

    /// Second chance after an error: initialize if that never completed,
    /// otherwise refresh.
    pub async fn retry(self: &Arc<Self>) -> Result<(), WidgetError> {
        if self.is_initialized() {
            self.try_refresh().await
        } else {
            self.initialize().await
        }
    }

    /// Tear down synchronously. Safe to call more than once and while an
    /// async load is in flight.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = lock(&self.refresh_task).take() {
            task.abort();
        }

        let children = std::mem::take(&mut *lock(&self.children));
        for (_, child) in children {
            child.destroy();
        }

        self.detach_widget_listeners();
        if let Some(retry) = lock(&self.retry_listener).take() {
            self.ctx.document.remove_listener(retry);
        }

        if let Ok(mut widget) = self.widget.try_lock() {
            self.run_destroy_hook(&mut widget);
        }

        let doc = &self.ctx.document;
        if doc.widget_of(&self.id).as_deref() == Some(self.id.as_str()) {
            let _ = doc.set_widget(&self.id, None);
            let _ = doc.set_content(&self.id, "");
            let _ = doc.remove_class(&self.id, WIDGET_CLASS);
            let _ = doc.remove_class(&self.id, LOADING_CLASS);
            for class in &self.options.class_names {
                let _ = doc.remove_class(&self.id, class);
            }
        }

        self.initialized.store(false, Ordering::Release);
        self.loading.store(false, Ordering::Release);
        debug!(widget = %self.id, "widget destroyed");
        self.emit(WIDGET_DESTROYED, json!({ "widget": self.name }));
    }

    // ── Events ──

    pub fn emit(&self, name: &str, payload: Value) -> Dispatch {
        self.ctx.bus.emit(&self.id, name, payload)
    }

    /// Listen to `name` emitted by this widget.
    pub fn on<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listen_bus(Scope::Widget(self.id.clone()), name, handler)
    }

    /// Listen to `name` from any emitter, detached when this widget is.
    pub fn on_global<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listen_bus(Scope::Global, name, handler)
    }

    fn listen_bus<F>(&self, scope: Scope, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let me = self.me.clone();
        let options = ListenOptions {
            owner: Some(self.id.clone()),
            on_error: Some(Arc::new(move |failure| {
                if let Some(host) = me.upgrade() {
                    host.handle_error(&WidgetError::Handler(format!(
                        "{}: {}",
                        failure.event, failure.message
                    )));
                }
            })),
        };
        let id = self.ctx.bus.listen(scope, name, options, handler);
        lock(&self.bus_listeners).push(id);
        id
    }

    /// Attach a DOM listener to the container. Events bubbling up from
    /// inside the widget reach it as well.
    pub fn listen_dom<F>(&self, event: &str, handler: F) -> DomListenerId
    where
        F: Fn(&DomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.attach_dom(ListenerTarget::Element(self.id.clone()), event, handler)
    }

    pub fn listen_document<F>(&self, event: &str, handler: F) -> DomListenerId
    where
        F: Fn(&DomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.attach_dom(ListenerTarget::Document, event, handler)
    }

    fn attach_dom<F>(&self, target: ListenerTarget, event: &str, handler: F) -> DomListenerId
    where
        F: Fn(&DomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self
            .ctx
            .document
            .add_listener(target, event, Some(self.failure_sink()), handler);
        lock(&self.dom_listeners).push(id);
        id
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.dom_listeners).len() + lock(&self.bus_listeners).len()
    }

    /// Handler failures land in this widget's own error path.
    fn failure_sink(&self) -> FailureSink {
        let me = self.me.clone();
        Arc::new(move |message: &str| {
            if let Some(host) = me.upgrade() {
                host.handle_error(&WidgetError::Handler(message.to_owned()));
            }
        })
    }

    fn detach_widget_listeners(&self) {
        for id in std::mem::take(&mut *lock(&self.dom_listeners)) {
            self.ctx.document.remove_listener(id);
        }
        for id in std::mem::take(&mut *lock(&self.bus_listeners)) {
            self.ctx.bus.off(id);
        }
    }

    // ── Children ──

    /// Attach `child` under `key`, destroying whatever was there.
    pub fn add_child(&self, key: &str, child: Arc<WidgetHost>) {
        if self.is_destroyed() {
            child.destroy();
            return;
        }
        let replaced = {
            let mut children = lock(&self.children);
            let old = children
                .iter()
                .position(|(k, _)| k == key)
                .map(|pos| children.remove(pos).1);
            children.push((key.to_owned(), child));
            old
        };
        if let Some(old) = replaced {
            old.destroy();
        }
    }

    pub fn child(&self, key: &str) -> Option<Arc<WidgetHost>> {
        lock(&self.children)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, child)| child.clone())
    }

    pub fn remove_child(&self, key: &str) -> bool {
        let removed = {
            let mut children = lock(&self.children);
            children
                .iter()
                .position(|(k, _)| k == key)
                .map(|pos| children.remove(pos).1)
        };
        match removed {
            Some(child) => {
                child.destroy();
                true
            }
            None => false,
        }
    }

    pub fn children(&self) -> Vec<Arc<WidgetHost>> {
        lock(&self.children).iter().map(|(_, c)| c.clone()).collect()
    }

    // ── Internals ──

    fn mount(&self) {
        let doc = &self.ctx.document;
        let _ = doc.add_class(&self.id, WIDGET_CLASS);
        for class in &self.options.class_names {
            let _ = doc.add_class(&self.id, class);
        }
        let _ = doc.set_widget(&self.id, Some(&self.id));

        if self.mounted.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = self.me.clone();
        let id = doc.add_listener(
            ListenerTarget::Element(self.id.clone()),
            "click",
            Some(self.failure_sink()),
            move |event| {
                if event.attr("action") != Some("retry") {
                    return Ok(());
                }
                let Some(host) = me.upgrade() else {
                    return Ok(());
                };
                let runtime = tokio::runtime::Handle::try_current()?;
                runtime.spawn(async move {
                    let _ = host.retry().await;
                });
                Ok(())
            },
        );
        *lock(&self.retry_listener) = Some(id);
    }

    fn show_loading(&self) {
        self.loading.store(true, Ordering::Release);
        let doc = &self.ctx.document;
        let _ = doc.add_class(&self.id, LOADING_CLASS);
        let _ = doc.set_content(&self.id, &html::loading(&format!("Loading {}...", self.name)));
    }

    fn finish_loading(&self) {
        self.loading.store(false, Ordering::Release);
        let _ = self.ctx.document.remove_class(&self.id, LOADING_CLASS);
    }

    fn render_with(self: &Arc<Self>, widget: &mut Box<dyn Widget>) -> Result<(), WidgetError> {
        if self.is_destroyed() {
            return Err(WidgetError::Destroyed(self.id.clone()));
        }
        let rendered = catch_unwind(AssertUnwindSafe(|| widget.render(&self.ctx)))
            .unwrap_or_else(|panic| Err(WidgetError::Render(panic_message(panic.as_ref()))));

        let markup = match rendered {
            Ok(markup) => markup,
            Err(err) => {
                let err = match err {
                    WidgetError::Render(_) => err,
                    other => WidgetError::Render(other.to_string()),
                };
                self.handle_error(&err);
                return Err(err);
            }
        };
        if self.ctx.document.set_content(&self.id, &markup).is_err() {
            let err = WidgetError::ContainerNotFound(self.id.clone());
            self.handle_error(&err);
            return Err(err);
        }
        if let Err(err) = widget.on_after_render(self) {
            self.handle_error(&err);
            return Err(err);
        }
        *lock(&self.last_error) = None;
        self.emit(WIDGET_RENDERED, json!({ "widget": self.name }));
        Ok(())
    }

    /// Log, show inline, emit exactly one `widget:error`.
    ///
    /// A failure raised by a listener while the error is being emitted is
    /// only logged, so a broken `widget:error` handler cannot recurse.
    fn handle_error(&self, err: &WidgetError) {
        error!(widget = %self.id, name = %self.name, kind = err.kind(), "{err}");
        if self.reporting.swap(true, Ordering::AcqRel) {
            return;
        }
        *lock(&self.last_error) = Some(err.clone());

        let doc = &self.ctx.document;
        if !self.is_destroyed() && doc.contains(&self.id) {
            let _ = doc.set_content(&self.id, &html::error_block(&self.name, err));
        }
        self.emit(
            WIDGET_ERROR,
            json!({
                "widget": self.name,
                "error": err.to_string(),
                "kind": err.kind(),
                "retryable": err.is_retryable(),
            }),
        );
        self.reporting.store(false, Ordering::Release);
    }

    fn run_destroy_hook(&self, widget: &mut Box<dyn Widget>) {
        if self.destroy_hook_ran.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| widget.on_destroy())) {
            error!(widget = %self.id, "on_destroy panicked: {}", panic_message(panic.as_ref()));
        }
    }

    fn start_refresh_timer(self: &Arc<Self>) {
        let Some(every) = self.options.refresh_interval.filter(|every| !every.is_zero()) else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(widget = %self.id, "no runtime, periodic refresh disabled");
            return;
        };
        let me = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(host) = me.upgrade() else { break };
                if host.is_destroyed() {
                    break;
                }
                host.refresh().await;
            }
        });
        if let Some(previous) = lock(&self.refresh_task).replace(task) {
            previous.abort();
        }
    }
}

impl Drop for WidgetHost {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.refresh_task).take() {
            task.abort();
        }
    }
}
