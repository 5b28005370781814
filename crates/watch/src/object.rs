use crate::error::WatchError;
use crate::log_opener::PodLogOpener;
use jobop_core::{Descriptor, EventBus, EventPayload, KindRegistry, State};
use jobop_stream::{StreamConfig, StreamReader};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// `kind/namespace/name`, mirroring the Python watcher's
/// `compose_object_id_from_values` (spec.md §4.E).
pub fn compose_object_id(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

fn metadata_str<'a>(body: &'a Value, field: &'static str) -> Result<&'a str, WatchError> {
    body.get("metadata")
        .and_then(|m| m.get(field))
        .and_then(|v| v.as_str())
        .ok_or(WatchError::MissingMetadata(field))
}

/// Tracks one watched Kubernetes object's state machine, and — for a Pod
/// leaving `Pending` for the first time — attaches a log tail (spec.md
/// §4.E). One `ObjectWatcher` is created per distinct `(kind, namespace,
/// name)` the fan-out observes.
pub struct ObjectWatcher {
    id: String,
    kind_name: String,
    namespace: String,
    name: String,
    registry: KindRegistry,
    bus: EventBus,
    body: Mutex<Value>,
    was_deleted: AtomicBool,
    has_read_logs: AtomicBool,
    current_state: Mutex<Option<State>>,
    log_opener: Option<Arc<dyn PodLogOpener>>,
    log_reader: Mutex<Option<Arc<StreamReader>>>,
}

impl ObjectWatcher {
    pub fn new(
        initial_body: Value,
        registry: KindRegistry,
        bus: EventBus,
        log_opener: Option<Arc<dyn PodLogOpener>>,
    ) -> Result<Self, WatchError> {
        let kind_name = initial_body
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or(WatchError::MissingMetadata("kind"))?
            .to_lowercase();
        let namespace = metadata_str(&initial_body, "namespace")?.to_string();
        let name = metadata_str(&initial_body, "name")?.to_string();
        let id = compose_object_id(&kind_name, &namespace, &name);
        Ok(Self {
            id,
            kind_name,
            namespace,
            name,
            registry,
            bus,
            body: Mutex::new(initial_body),
            was_deleted: AtomicBool::new(false),
            has_read_logs: AtomicBool::new(false),
            current_state: Mutex::new(None),
            log_opener,
            log_reader: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind_name(&self) -> &str {
        &self.kind_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Option<State> {
        *self.current_state.lock().expect("state lock poisoned")
    }

    pub fn body(&self) -> Value {
        self.body.lock().expect("body lock poisoned").clone()
    }

    /// Applies a watch event (`ADDED`/`MODIFIED`/`DELETED`/`BOOKMARK`),
    /// recomputes state, emits `"status"` exactly when it changes, and — on
    /// a Pod's first transition away from `Pending` — attaches a log
    /// reader exactly once (spec.md §4.E, §8 invariant).
    pub fn update(&self, event_type: &str, body: Value) -> Result<(), WatchError> {
        if event_type == "DELETED" {
            self.was_deleted.store(true, Ordering::SeqCst);
        }
        *self.body.lock().expect("body lock poisoned") = body.clone();

        let mut scratch = body;
        let descriptor = Descriptor::new(&mut scratch, &self.registry, false)?;
        let new_state = descriptor.state(self.was_deleted.load(Ordering::SeqCst))?;

        let changed = {
            let mut current = self.current_state.lock().expect("state lock poisoned");
            let changed = *current != Some(new_state);
            *current = Some(new_state);
            changed
        };

        if changed {
            self.bus.emit("status", EventPayload::Status { state: new_state, object_id: self.id.clone() });
        }

        if self.kind_name == "pod" && new_state != State::Pending && !self.has_read_logs.swap(true, Ordering::SeqCst) {
            self.attach_log_reader(new_state);
        }

        Ok(())
    }

    /// `Running` gets an async tail; any other post-`Pending` state (the pod
    /// has already exited) gets a one-shot read of the full log instead of
    /// an indefinite follow (spec.md §4.E).
    fn attach_log_reader(&self, state: State) {
        let Some(opener) = &self.log_opener else { return };
        let follow = state == State::Running;
        debug!(object = %self.id, follow, "attaching pod log reader");
        let factory = opener.open_pod_log(&self.namespace, &self.name, follow);
        let config = StreamConfig { data_event_name: "log".to_string(), read_as_object: false, ..StreamConfig::default() };
        let reader = Arc::new(StreamReader::new(factory, self.bus.clone(), config));
        if follow {
            if reader.start_async().is_ok() {
                *self.log_reader.lock().expect("log reader lock poisoned") = Some(reader);
            }
        } else if let Ok(mut rx) = reader.start_generator() {
            tokio::spawn(async move { while rx.recv().await.is_some() {} });
        }
    }

    /// Requests a clean stop of any attached log reader.
    pub fn stop(&self) {
        if let Some(reader) = self.log_reader.lock().expect("log reader lock poisoned").take() {
            reader.stop();
        }
    }
}
