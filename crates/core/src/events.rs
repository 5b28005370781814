use crate::state::State;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Event payloads used across the watch/stream/runner pipeline. A single
/// enum rather than `dyn Any` — this is domain-specific plumbing, not a
/// general pub/sub library (spec.md §4.A: "a polymorphic emitter").
#[derive(Clone, Debug)]
pub enum EventPayload {
    None,
    Line(String),
    Json(serde_json::Value),
    Warning(String),
    Error(String),
    WatchEvent { event_type: String, object: serde_json::Value },
    Status { state: State, object_id: String },
}

#[derive(Clone, Debug)]
pub struct Event {
    pub name: String,
    pub payload: EventPayload,
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Inner {
    handlers: HashMap<String, Vec<(u64, Handler)>>,
    piped: Vec<EventBus>,
    next_id: u64,
}

/// Synchronous, in-process named-event dispatcher (spec.md §4.A). Cloning an
/// `EventBus` shares the same underlying registrations — this is a handle,
/// not a fresh bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { handlers: HashMap::new(), piped: Vec::new(), next_id: 0 })),
        }
    }

    /// Registers `handler` for `name`, returning a subscription id for `off`.
    pub fn on(&self, name: &str, handler: impl Fn(&Event) + Send + Sync + 'static) -> u64 {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.entry(name.to_string()).or_default().push((id, Arc::new(handler)));
        id
    }

    pub fn off(&self, name: &str, id: u64) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        if let Some(v) = inner.handlers.get_mut(name) {
            v.retain(|(hid, _)| *hid != id);
        }
    }

    /// Invokes handlers registered for `name` in registration order (FIFO),
    /// then forwards to every piped bus. A handler must not panic; if it
    /// needs to surface a failure, it should call `emit("error", ...)` on
    /// this same bus — the dedicated error event, not a broken emission
    /// chain (spec.md §4.A).
    pub fn emit(&self, name: &str, payload: EventPayload) {
        let event = Event { name: name.to_string(), payload };
        let (handlers, piped) = {
            let inner = self.inner.lock().expect("event bus lock poisoned");
            let handlers = inner.handlers.get(name).cloned().unwrap_or_default();
            (handlers, inner.piped.clone())
        };
        for (_, handler) in handlers {
            handler(&event);
        }
        for target in piped {
            target.emit(&event.name, event.payload.clone());
        }
    }

    /// Forwards every event emitted on `self` (any name, including ones not
    /// yet registered) to `target`. Cycles (`a.pipe(b); b.pipe(a)`) are a
    /// caller error and are not detected — see SPEC_FULL.md §4.A.
    pub fn pipe(&self, target: EventBus) {
        self.inner.lock().expect("event bus lock poisoned").piped.push(target);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.on("x", move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.on("x", move |_| o2.lock().unwrap().push(2));
        bus.emit("x", EventPayload::None);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn off_removes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = bus.on("x", move |_| { c.fetch_add(1, Ordering::SeqCst); });
        bus.emit("x", EventPayload::None);
        bus.off("x", id);
        bus.emit("x", EventPayload::None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pipe_forwards_every_event_to_target() {
        let source = EventBus::new();
        let target = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        target.on("status", move |e| r.lock().unwrap().push(e.name.clone()));
        source.pipe(target);
        source.emit("status", EventPayload::None);
        assert_eq!(*received.lock().unwrap(), vec!["status".to_string()]);
    }
}
