use crate::error::WatchError;
use crate::log_opener::PodLogOpener;
use crate::object::{compose_object_id, ObjectWatcher};
use crate::watch_opener::WatchStreamOpener;
use jobop_core::{EventBus, EventPayload, KindRegistry, State};
use jobop_stream::{StreamConfig, StreamReader};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

struct Waiter {
    id: u64,
    kind: Option<String>,
    name: Option<String>,
    namespace: Option<String>,
    statuses: Vec<State>,
    tx: oneshot::Sender<Arc<ObjectWatcher>>,
}

impl Waiter {
    fn matches(&self, watcher: &ObjectWatcher, state: State) -> bool {
        matches_filters(watcher, state, self.kind.as_deref(), self.name.as_deref(), self.namespace.as_deref(), &self.statuses)
    }
}

fn matches_filters(
    watcher: &ObjectWatcher,
    state: State,
    kind: Option<&str>,
    name: Option<&str>,
    namespace: Option<&str>,
    statuses: &[State],
) -> bool {
    if !statuses.contains(&state) {
        return false;
    }
    if let Some(k) = kind {
        if !watcher.kind_name().eq_ignore_ascii_case(k) {
            return false;
        }
    }
    if let Some(n) = name {
        if watcher.name() != n {
            return false;
        }
    }
    if let Some(ns) = namespace {
        if watcher.namespace() != ns {
            return false;
        }
    }
    true
}

struct FanoutState {
    object_watchers: HashMap<String, Arc<ObjectWatcher>>,
    namespace_tasks: HashMap<String, Vec<JoinHandle<()>>>,
    waiters: Vec<Waiter>,
    next_waiter_id: u64,
    /// One receiver per underlying reader started so far, resolved with
    /// `Ok(())` when that reader emits `"started"`, or `Err(())` if it
    /// emits `"error"`/`"stopped"` first — a reader that dies before
    /// connecting must not be indistinguishable from one that connected
    /// (spec.md §4.F "Startup barrier"). Drained by `wait_until_running`.
    pending_started: Vec<oneshot::Receiver<Result<(), ()>>>,
}

/// Fans a namespace's watch out across every registered watchable kind,
/// feeding a shared event bus and object-watcher table, and offers
/// predicate-based blocking waits over it (spec.md §4.F).
///
/// `wait_for_status` registers its wait (scanning already-known objects,
/// then recording a waiter) while holding the same lock that
/// `handle_watch_event` holds while mutating `object_watchers` and
/// resolving waiters — closing the race where a matching status change
/// could otherwise land in the gap between the scan and the subscribe
/// (SPEC_FULL.md §9, resolving spec.md's open question on this point).
/// Waiters are resolved synchronously, in the same critical section as the
/// state transition that satisfies them, rather than via a second pass
/// through the event bus — avoiding a lock a waiter's own resolution would
/// otherwise have to re-enter.
#[derive(Clone)]
pub struct NamespaceWatch {
    bus: EventBus,
    registry: KindRegistry,
    opener: Arc<dyn WatchStreamOpener>,
    log_opener: Option<Arc<dyn PodLogOpener>>,
    remove_deleted_from_memory: bool,
    state: Arc<Mutex<FanoutState>>,
}

impl NamespaceWatch {
    pub fn new(
        registry: KindRegistry,
        bus: EventBus,
        opener: Arc<dyn WatchStreamOpener>,
        log_opener: Option<Arc<dyn PodLogOpener>>,
    ) -> Self {
        Self {
            bus,
            registry,
            opener,
            log_opener,
            remove_deleted_from_memory: true,
            state: Arc::new(Mutex::new(FanoutState {
                object_watchers: HashMap::new(),
                namespace_tasks: HashMap::new(),
                waiters: Vec::new(),
                next_waiter_id: 0,
                pending_started: Vec::new(),
            })),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Starts one reader per registered watchable kind in `namespace`.
    /// Errors if the namespace is already being watched.
    pub async fn watch_namespace(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<(), WatchError> {
        let mut state = self.state.lock().expect("fanout lock poisoned");
        if state.namespace_tasks.contains_key(namespace) {
            return Err(WatchError::AlreadyWatched(namespace.to_string()));
        }

        let mut tasks = Vec::new();
        let mut started_rxs = Vec::new();
        for kind in self.registry.watchable() {
            let factory = self.opener.open_watch(namespace, &kind, label_selector, field_selector);
            let config = StreamConfig { data_event_name: "watch".to_string(), read_as_object: true, ..StreamConfig::default() };
            let reader_bus = EventBus::new();

            let (started_tx, started_rx) = oneshot::channel();
            let started_tx = Arc::new(Mutex::new(Some(started_tx)));

            let tx = started_tx.clone();
            reader_bus.on("started", move |_| {
                if let Some(tx) = tx.lock().expect("started-signal lock poisoned").take() {
                    let _ = tx.send(Ok(()));
                }
            });
            let tx = started_tx.clone();
            reader_bus.on("error", move |_| {
                if let Some(tx) = tx.lock().expect("started-signal lock poisoned").take() {
                    let _ = tx.send(Err(()));
                }
            });
            let tx = started_tx.clone();
            reader_bus.on("stopped", move |_| {
                if let Some(tx) = tx.lock().expect("started-signal lock poisoned").take() {
                    let _ = tx.send(Err(()));
                }
            });
            started_rxs.push(started_rx);

            let reader = StreamReader::new(factory, reader_bus, config);
            let rx = reader.start_generator()?;

            let this = self.clone();
            let kind_label = kind.name().to_string();
            let task = tokio::spawn(async move {
                let _reader = reader;
                let mut rx = rx;
                while let Some(event) = rx.recv().await {
                    match (event.name.as_str(), event.payload) {
                        ("watch", EventPayload::Json(envelope)) => this.handle_watch_event(envelope),
                        ("error", EventPayload::Error(msg)) => warn!(kind = %kind_label, error = %msg, "watch stream ended with error"),
                        _ => {}
                    }
                }
            });
            tasks.push(task);
        }

        state.namespace_tasks.insert(namespace.to_string(), tasks);
        state.pending_started.extend(started_rxs);
        Ok(())
    }

    /// Startup barrier (spec.md §4.F): blocks until every reader started so
    /// far across every watched namespace has emitted `"started"`. A reader
    /// that ends (error or clean stop) before ever starting resolves the
    /// barrier to [`WatchError::ReaderFailedBeforeStart`] instead of quietly
    /// succeeding — its sender would otherwise just be dropped, and a
    /// dropped oneshot is indistinguishable from one that never ran.
    pub async fn wait_until_running(&self, timeout: Option<Duration>) -> Result<(), WatchError> {
        let receivers = {
            let mut state = self.state.lock().expect("fanout lock poisoned");
            std::mem::take(&mut state.pending_started)
        };
        let all = futures::future::join_all(receivers);
        let results = match timeout {
            Some(d) => tokio::time::timeout(d, all).await.map_err(|_| WatchError::StartupTimeout)?,
            None => all.await,
        };
        if results.into_iter().any(|r| !matches!(r, Ok(Ok(())))) {
            return Err(WatchError::ReaderFailedBeforeStart);
        }
        Ok(())
    }

    fn handle_watch_event(&self, envelope: Value) {
        let event_type = envelope.get("type").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let Some(object) = envelope.get("object").cloned() else { return };

        let mut state = self.state.lock().expect("fanout lock poisoned");
        let id = {
            let kind = object.get("kind").and_then(|v| v.as_str()).unwrap_or_default().to_lowercase();
            let ns = object.get("metadata").and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).unwrap_or_default();
            let name = object.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or_default();
            compose_object_id(&kind, ns, name)
        };

        if !state.object_watchers.contains_key(&id) {
            if event_type == "DELETED" {
                return;
            }
            match ObjectWatcher::new(object.clone(), self.registry.clone(), self.bus.clone(), self.log_opener.clone()) {
                Ok(watcher) => {
                    state.object_watchers.insert(id.clone(), Arc::new(watcher));
                }
                Err(e) => {
                    warn!(error = %e, "could not start tracking watched object");
                    return;
                }
            }
        }

        let watcher = state.object_watchers.get(&id).cloned().expect("just inserted or already present");
        if let Err(e) = watcher.update(&event_type, object) {
            warn!(object = %id, error = %e, "failed to update object state");
        }

        if let Some(new_state) = watcher.state() {
            let mut remaining = Vec::with_capacity(state.waiters.len());
            for waiter in state.waiters.drain(..) {
                if waiter.matches(&watcher, new_state) {
                    let _ = waiter.tx.send(watcher.clone());
                } else {
                    remaining.push(waiter);
                }
            }
            state.waiters = remaining;
        }

        if event_type == "DELETED" {
            watcher.stop();
            if self.remove_deleted_from_memory {
                state.object_watchers.remove(&id);
            }
        }
    }

    pub fn object_watchers(&self) -> Vec<Arc<ObjectWatcher>> {
        self.state.lock().expect("fanout lock poisoned").object_watchers.values().cloned().collect()
    }

    /// Blocks until an object matching the given filters reaches one of
    /// `statuses`, checking already-known objects first (spec.md §4.F).
    pub async fn wait_for_status(
        &self,
        kind: Option<&str>,
        name: Option<&str>,
        namespace: Option<&str>,
        statuses: &[State],
        timeout: Option<Duration>,
    ) -> Option<Arc<ObjectWatcher>> {
        let (tx, rx) = oneshot::channel();
        let waiter_id = {
            let mut state = self.state.lock().expect("fanout lock poisoned");
            for watcher in state.object_watchers.values() {
                if let Some(st) = watcher.state() {
                    if matches_filters(watcher, st, kind, name, namespace, statuses) {
                        return Some(watcher.clone());
                    }
                }
            }

            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.waiters.push(Waiter {
                id,
                kind: kind.map(|k| k.to_lowercase()),
                name: name.map(str::to_string),
                namespace: namespace.map(str::to_string),
                statuses: statuses.to_vec(),
                tx,
            });
            id
        };

        let result = match timeout {
            Some(d) => tokio::time::timeout(d, rx).await.ok().and_then(|r| r.ok()),
            None => rx.await.ok(),
        };

        if result.is_none() {
            self.state.lock().expect("fanout lock poisoned").waiters.retain(|w| w.id != waiter_id);
        }
        result
    }

    pub async fn stop_namespace(&self, namespace: &str) {
        let tasks = {
            let mut state = self.state.lock().expect("fanout lock poisoned");
            state.namespace_tasks.remove(namespace)
        };
        if let Some(tasks) = tasks {
            for task in tasks {
                task.abort();
            }
        }
    }

    pub async fn stop_all(&self) {
        let (tasks, watchers) = {
            let mut state = self.state.lock().expect("fanout lock poisoned");
            let tasks: Vec<_> = state.namespace_tasks.drain().flat_map(|(_, v)| v).collect();
            let watchers: Vec<_> = state.object_watchers.drain().map(|(_, v)| v).collect();
            (tasks, watchers)
        };
        for task in tasks {
            task.abort();
        }
        for watcher in watchers {
            watcher.stop();
        }
    }
}
