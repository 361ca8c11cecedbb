//! Headless document model.
//!
//! Elements form a tree keyed by id. Each element carries a class set, an
//! opaque HTML content string (what a widget rendered into it) and an
//! optional back-reference to the widget mounted on it. Listeners attach to
//! an element or to the document; a dispatched event bubbles from the target
//! through its ancestors and finally reaches document-level listeners.

use cm_events::panic_message;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{error, trace};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("element #{0} not found")]
    NotFound(String),
    #[error("element #{0} already exists")]
    Duplicate(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub classes: BTreeSet<String>,
    pub content: String,
    pub widget: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerTarget {
    Element(String),
    Document,
}

#[derive(Debug, Clone)]
pub struct DomEvent {
    pub name: String,
    /// Element the event was dispatched on.
    pub target: String,
    /// Element (or `None` for the document) whose listener is running.
    pub current_target: Option<String>,
    pub data: Value,
}

impl DomEvent {
    /// `data[key]` as a string, the headless stand-in for a `data-*` attribute.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomListenerId(u64);

pub type DomHandler = Arc<dyn Fn(&DomEvent) -> anyhow::Result<()> + Send + Sync>;
pub type FailureSink = Arc<dyn Fn(&str) + Send + Sync>;

struct DomListener {
    id: DomListenerId,
    target: ListenerTarget,
    event: String,
    handler: DomHandler,
    on_error: Option<FailureSink>,
    active: AtomicBool,
}

#[derive(Default)]
pub struct Document {
    elements: Mutex<BTreeMap<String, Element>>,
    listeners: Mutex<Vec<Arc<DomListener>>>,
    next_id: AtomicU64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    fn elements(&self) -> MutexGuard<'_, BTreeMap<String, Element>> {
        self.elements.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Arc<DomListener>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Tree ──

    pub fn create_element(&self, id: &str, parent: Option<&str>) -> Result<(), DomError> {
        let mut elements = self.elements();
        if elements.contains_key(id) {
            return Err(DomError::Duplicate(id.to_owned()));
        }
        if let Some(parent) = parent {
            let parent_el = elements
                .get_mut(parent)
                .ok_or_else(|| DomError::NotFound(parent.to_owned()))?;
            parent_el.children.push(id.to_owned());
        }
        elements.insert(
            id.to_owned(),
            Element {
                id: id.to_owned(),
                parent: parent.map(ToOwned::to_owned),
                ..Element::default()
            },
        );
        Ok(())
    }

    /// Remove an element and its whole subtree. Listeners attached to
    /// removed elements are dropped as well.
    pub fn remove_element(&self, id: &str) -> Result<(), DomError> {
        let removed = {
            let mut elements = self.elements();
            let Some(root) = elements.get(id).cloned() else {
                return Err(DomError::NotFound(id.to_owned()));
            };
            if let Some(parent) = root.parent.as_deref().and_then(|p| elements.get_mut(p)) {
                parent.children.retain(|child| child != id);
            }
            let mut stack = vec![id.to_owned()];
            let mut removed = Vec::new();
            while let Some(next) = stack.pop() {
                if let Some(el) = elements.remove(&next) {
                    stack.extend(el.children);
                    removed.push(next);
                }
            }
            removed
        };

        self.listeners().retain(|listener| match &listener.target {
            ListenerTarget::Element(el) if removed.contains(el) => {
                listener.active.store(false, Ordering::Release);
                false
            }
            _ => true,
        });
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements().contains_key(id)
    }

    pub fn element(&self, id: &str) -> Option<Element> {
        self.elements().get(id).cloned()
    }

    pub fn children(&self, id: &str) -> Vec<String> {
        self.elements()
            .get(id)
            .map(|el| el.children.clone())
            .unwrap_or_default()
    }

    fn with_element<R>(&self, id: &str, f: impl FnOnce(&mut Element) -> R) -> Result<R, DomError> {
        self.elements()
            .get_mut(id)
            .map(f)
            .ok_or_else(|| DomError::NotFound(id.to_owned()))
    }

    pub fn set_content(&self, id: &str, html: &str) -> Result<(), DomError> {
        self.with_element(id, |el| el.content = html.to_owned())
    }

    pub fn content(&self, id: &str) -> Option<String> {
        self.elements().get(id).map(|el| el.content.clone())
    }

    pub fn add_class(&self, id: &str, class: &str) -> Result<(), DomError> {
        self.with_element(id, |el| {
            el.classes.insert(class.to_owned());
        })
    }

    pub fn remove_class(&self, id: &str, class: &str) -> Result<(), DomError> {
        self.with_element(id, |el| {
            el.classes.remove(class);
        })
    }

    pub fn toggle_class(&self, id: &str, class: &str, force: bool) -> Result<(), DomError> {
        if force {
            self.add_class(id, class)
        } else {
            self.remove_class(id, class)
        }
    }

    pub fn has_class(&self, id: &str, class: &str) -> bool {
        self.elements()
            .get(id)
            .is_some_and(|el| el.classes.contains(class))
    }

    pub fn set_widget(&self, id: &str, widget: Option<&str>) -> Result<(), DomError> {
        self.with_element(id, |el| el.widget = widget.map(ToOwned::to_owned))
    }

    pub fn widget_of(&self, id: &str) -> Option<String> {
        self.elements().get(id).and_then(|el| el.widget.clone())
    }

    fn ancestry(&self, id: &str) -> Vec<String> {
        let elements = self.elements();
        let mut path = Vec::new();
        let mut cursor = elements.get(id);
        while let Some(el) = cursor {
            path.push(el.id.clone());
            cursor = el.parent.as_deref().and_then(|p| elements.get(p));
        }
        path
    }

    // ── Listeners ──

    pub fn add_listener<F>(
        &self,
        target: ListenerTarget,
        event: &str,
        on_error: Option<FailureSink>,
        handler: F,
    ) -> DomListenerId
    where
        F: Fn(&DomEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = DomListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners().push(Arc::new(DomListener {
            id,
            target,
            event: event.to_owned(),
            handler: Arc::new(handler),
            on_error,
            active: AtomicBool::new(true),
        }));
        id
    }

    pub fn remove_listener(&self, id: DomListenerId) -> bool {
        let mut listeners = self.listeners();
        match listeners.iter().position(|l| l.id == id) {
            Some(pos) => {
                listeners.remove(pos).active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Fire `event` at element `target`. Returns how many handlers ran.
    /// Handler failures are reported to the listener's sink and do not stop
    /// propagation.
    pub fn dispatch(&self, target: &str, event: &str, data: Value) -> usize {
        let path = self.ancestry(target);
        let snapshot: Vec<Arc<DomListener>> = self
            .listeners()
            .iter()
            .filter(|l| l.event == event)
            .cloned()
            .collect();

        let mut stops: Vec<Option<String>> = path.into_iter().map(Some).collect();
        stops.push(None);

        let mut ran = 0;
        for stop in stops {
            let dom_event = DomEvent {
                name: event.to_owned(),
                target: target.to_owned(),
                current_target: stop.clone(),
                data: data.clone(),
            };
            for listener in &snapshot {
                let here = match (&listener.target, &stop) {
                    (ListenerTarget::Element(el), Some(current)) => el == current,
                    (ListenerTarget::Document, None) => true,
                    _ => false,
                };
                if !here || !listener.active.load(Ordering::Acquire) {
                    continue;
                }
                ran += 1;
                let outcome = catch_unwind(AssertUnwindSafe(|| (listener.handler)(&dom_event)));
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(format!("{err:#}")),
                    Err(panic) => Some(panic_message(panic.as_ref())),
                };
                if let Some(message) = failure {
                    match &listener.on_error {
                        Some(sink) => {
                            if catch_unwind(AssertUnwindSafe(|| sink(&message))).is_err() {
                                error!(event, target, "dom failure sink panicked");
                            }
                        }
                        None => error!(event, target, "dom listener failed: {message}"),
                    }
                }
            }
        }
        trace!(event, target, ran, "dom dispatch");
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&DomEvent) -> anyhow::Result<()> + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, move |_: &DomEvent| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn tree_and_classes() -> anyhow::Result<()> {
        let doc = Document::new();
        doc.create_element("root", None)?;
        doc.create_element("child", Some("root"))?;

        assert_eq!(doc.create_element("child", None), Err(DomError::Duplicate("child".into())));
        assert_eq!(
            doc.create_element("orphan", Some("nope")),
            Err(DomError::NotFound("nope".into()))
        );

        doc.add_class("child", "active")?;
        assert!(doc.has_class("child", "active"));
        doc.toggle_class("child", "active", false)?;
        assert!(!doc.has_class("child", "active"));

        doc.set_content("child", "<p>x</p>")?;
        assert_eq!(doc.content("child").as_deref(), Some("<p>x</p>"));
        assert_eq!(doc.children("root"), vec!["child".to_owned()]);
        Ok(())
    }

    #[test]
    fn events_bubble_to_ancestors_then_document() -> anyhow::Result<()> {
        let doc = Document::new();
        doc.create_element("app", None)?;
        doc.create_element("list", Some("app"))?;

        let order = Arc::new(Mutex::new(Vec::new()));
        for (target, tag) in [
            (ListenerTarget::Document, "doc"),
            (ListenerTarget::Element("app".into()), "app"),
            (ListenerTarget::Element("list".into()), "list"),
        ] {
            let order = order.clone();
            doc.add_listener(target, "click", None, move |e| {
                order.lock().unwrap().push(format!("{tag}:{}", e.attr("action").unwrap_or("")));
                Ok(())
            });
        }

        let ran = doc.dispatch("list", "click", json!({"action": "delete"}));

        assert_eq!(ran, 3);
        assert_eq!(
            *order.lock().unwrap(),
            vec!["list:delete", "app:delete", "doc:delete"]
        );
        Ok(())
    }

    #[test]
    fn removed_listener_never_fires() -> anyhow::Result<()> {
        let doc = Document::new();
        doc.create_element("btn", None)?;
        let (hits, handler) = counter();
        let id = doc.add_listener(ListenerTarget::Element("btn".into()), "click", None, handler);

        doc.dispatch("btn", "click", Value::Null);
        assert!(doc.remove_listener(id));
        assert!(!doc.remove_listener(id));
        doc.dispatch("btn", "click", Value::Null);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn failing_listener_is_isolated() -> anyhow::Result<()> {
        let doc = Document::new();
        doc.create_element("btn", None)?;
        let failures = Arc::new(Mutex::new(Vec::new()));
        let f = failures.clone();
        doc.add_listener(
            ListenerTarget::Element("btn".into()),
            "click",
            Some(Arc::new(move |msg: &str| f.lock().unwrap().push(msg.to_owned()))),
            |_| panic!("handler exploded"),
        );
        let (hits, handler) = counter();
        doc.add_listener(ListenerTarget::Element("btn".into()), "click", None, handler);

        assert_eq!(doc.dispatch("btn", "click", Value::Null), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*failures.lock().unwrap(), vec!["handler exploded".to_owned()]);
        Ok(())
    }

    #[test]
    fn removing_subtree_drops_its_listeners() -> anyhow::Result<()> {
        let doc = Document::new();
        doc.create_element("app", None)?;
        doc.create_element("panel", Some("app"))?;
        doc.create_element("inner", Some("panel"))?;
        let (_, handler) = counter();
        doc.add_listener(ListenerTarget::Element("inner".into()), "click", None, handler);

        doc.remove_element("panel")?;

        assert!(!doc.contains("inner"));
        assert!(doc.children("app").is_empty());
        assert_eq!(doc.listener_count(), 0);
        Ok(())
    }
}
