//! In-process event bus.
//!
//! Every emission is delivered twice: first to listeners scoped to the
//! emitting widget, then to global listeners. Delivery is synchronous and
//! completes before `emit` returns. A listener that fails (returns `Err` or
//! panics) is reported to its own error sink; the remaining listeners still
//! run and the emitter never sees the failure.
//!
//! Async observers that only need to watch traffic can take a
//! [`EventBus::stream`] receiver instead of registering a handler.

use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, error};

pub mod names {
    pub const WIDGET_INITIALIZED: &str = "widget:initialized";
    pub const WIDGET_RENDERED: &str = "widget:rendered";
    pub const WIDGET_REFRESHED: &str = "widget:refreshed";
    pub const WIDGET_ERROR: &str = "widget:error";
    pub const WIDGET_DESTROYED: &str = "widget:destroyed";
    pub const TAB_CHANGED: &str = "tab:changed";
    pub const APP_NOTIFICATION: &str = "app:notification";
    pub const APP_REFRESH: &str = "app:refresh";

    /// Matches every event name when used as a global listener.
    pub const ANY: &str = "*";
}

const STREAM_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub name: String,
    /// Id of the emitting widget, `None` for app-level publications.
    pub source: Option<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Only events emitted by this widget id.
    Widget(String),
    Global,
}

#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub listener: ListenerId,
    pub event: String,
    pub owner: Option<String>,
    pub message: String,
}

pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;
pub type ErrorSink = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;

struct Listener {
    id: ListenerId,
    name: String,
    scope: Scope,
    owner: Option<String>,
    handler: Handler,
    on_error: Option<ErrorSink>,
    active: AtomicBool,
}

impl Listener {
    fn matches(&self, event: &BusEvent, global_pass: bool) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        match (&self.scope, global_pass) {
            (Scope::Widget(id), false) => {
                self.name == event.name && event.source.as_deref() == Some(id.as_str())
            }
            (Scope::Global, true) => self.name == event.name || self.name == names::ANY,
            _ => false,
        }
    }
}

/// Options for a new listener.
#[derive(Default, Clone)]
pub struct ListenOptions {
    pub owner: Option<String>,
    pub on_error: Option<ErrorSink>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub delivered: usize,
    pub failed: usize,
}

pub struct EventBus {
    listeners: Mutex<Vec<Arc<Listener>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (stream, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<Listener>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn listen<F>(&self, scope: Scope, name: &str, options: ListenOptions, handler: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener = Listener {
            id,
            name: name.to_owned(),
            scope,
            owner: options.owner,
            handler: Arc::new(handler),
            on_error: options.on_error,
            active: AtomicBool::new(true),
        };
        self.listeners().push(Arc::new(listener));
        id
    }

    /// Listen to events emitted by `widget_id` only.
    pub fn on<F>(&self, widget_id: &str, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listen(
            Scope::Widget(widget_id.to_owned()),
            name,
            ListenOptions {
                owner: Some(widget_id.to_owned()),
                on_error: None,
            },
            handler,
        )
    }

    /// Listen to `name` from any emitter.
    pub fn on_global<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listen(Scope::Global, name, ListenOptions::default(), handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners();
        match guard.iter().position(|l| l.id == id) {
            Some(pos) => {
                let listener = guard.remove(pos);
                listener.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Remove every listener registered with `owner`.
    pub fn off_owner(&self, owner: &str) -> usize {
        let mut guard = self.listeners();
        let before = guard.len();
        guard.retain(|l| {
            let owned = l.owner.as_deref() == Some(owner);
            if owned {
                l.active.store(false, Ordering::Release);
            }
            !owned
        });
        before - guard.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    pub fn stream(&self) -> broadcast::Receiver<BusEvent> {
        self.stream.subscribe()
    }

    /// Emit on behalf of a widget: scoped listeners first, then global ones.
    pub fn emit(&self, source: &str, name: &str, payload: Value) -> Dispatch {
        self.dispatch(BusEvent {
            name: name.to_owned(),
            source: Some(source.to_owned()),
            payload,
        })
    }

    /// Emit an app-level event with no widget source.
    pub fn publish(&self, name: &str, payload: Value) -> Dispatch {
        self.dispatch(BusEvent {
            name: name.to_owned(),
            source: None,
            payload,
        })
    }

    fn dispatch(&self, event: BusEvent) -> Dispatch {
        let snapshot: Vec<Arc<Listener>> = self.listeners().clone();
        let mut report = Dispatch::default();

        for global_pass in [false, true] {
            for listener in snapshot.iter().filter(|l| l.matches(&event, global_pass)) {
                report.delivered += 1;
                if let Some(message) = invoke(&listener.handler, &event) {
                    report.failed += 1;
                    let failure = HandlerFailure {
                        listener: listener.id,
                        event: event.name.clone(),
                        owner: listener.owner.clone(),
                        message,
                    };
                    report_failure(listener.on_error.as_ref(), &failure);
                }
            }
        }

        debug!(
            event = %event.name,
            source = ?event.source,
            delivered = report.delivered,
            failed = report.failed,
            "dispatched"
        );
        let _ = self.stream.send(event);
        report
    }
}

fn invoke(handler: &Handler, event: &BusEvent) -> Option<String> {
    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(panic) => Some(panic_message(panic.as_ref())),
    }
}

fn report_failure(sink: Option<&ErrorSink>, failure: &HandlerFailure) {
    match sink {
        Some(sink) => {
            if catch_unwind(AssertUnwindSafe(|| sink(failure))).is_err() {
                error!(event = %failure.event, "error sink panicked while reporting handler failure");
            }
        }
        None => error!(
            event = %failure.event,
            owner = ?failure.owner,
            "event handler failed: {}",
            failure.message
        ),
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |tag: &str| {
            let log = log2.clone();
            let tag = tag.to_owned();
            Box::new(move |event: &BusEvent| {
                log.lock().unwrap().push(format!("{tag}:{}", event.name));
                Ok(())
            }) as Box<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn scoped_listeners_run_before_global_and_filter_by_source() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        bus.on_global("saved", make("global"));
        bus.on("w1", "saved", make("w1"));
        bus.on("w2", "saved", make("w2"));

        let report = bus.emit("w1", "saved", json!({}));

        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["w1:saved", "global:saved"]);
    }

    #[test]
    fn failing_listener_does_not_block_siblings() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sink_hits = Arc::new(Mutex::new(Vec::new()));

        let sink_log = sink_hits.clone();
        bus.listen(
            Scope::Global,
            "tick",
            ListenOptions {
                owner: Some("bad".into()),
                on_error: Some(Arc::new(move |f: &HandlerFailure| {
                    sink_log.lock().unwrap().push(f.message.clone());
                })),
            },
            |_| anyhow::bail!("boom"),
        );
        bus.on_global("tick", |_| panic!("kaboom"));
        let c = calls.clone();
        bus.on_global("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let report = bus.publish("tick", Value::Null);

        assert_eq!(report, Dispatch { delivered: 3, failed: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*sink_hits.lock().unwrap(), vec!["boom".to_owned()]);
    }

    #[test]
    fn listeners_added_during_dispatch_wait_for_next_emit() {
        let bus = Arc::new(EventBus::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let bus2 = bus.clone();
        let late = late_calls.clone();
        bus.on_global("ping", move |_| {
            let late = late.clone();
            bus2.on_global("ping", move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        bus.publish("ping", Value::Null);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        bus.publish("ping", Value::Null);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_listener_is_skipped_even_mid_dispatch() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let bus2 = bus.clone();
        bus.on("w", "go", move |_| {
            bus2.off_owner("w");
            Ok(())
        });
        let h = hits.clone();
        bus.on("w", "go", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit("w", "go", Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn wildcard_global_sees_everything() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        bus.on_global(names::ANY, make("all"));

        bus.emit("w", names::WIDGET_RENDERED, Value::Null);
        bus.publish(names::APP_REFRESH, Value::Null);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["all:widget:rendered", "all:app:refresh"]
        );
    }

    #[tokio::test]
    async fn stream_receives_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.stream();

        bus.emit("w9", "customer:saved", json!({"id": "c1"}));

        let event = rx.recv().await.expect("event on stream");
        assert_eq!(event.name, "customer:saved");
        assert_eq!(event.source.as_deref(), Some("w9"));
        assert_eq!(event.payload["id"], "c1");
    }
}
