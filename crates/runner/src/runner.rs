use crate::backend::ClusterBackend;
use crate::error::RunnerError;
use crate::kube_backend::{KubeBackend, KubeLogOpener, KubeWatchOpener};
use crate::options::{ExecuteOptions, RunnerOptions};
use crate::prepare::{prepare_element, ManifestSource, PrepareHooks};
use jobop_core::{EventBus, EventPayload, Kind, KindRegistry, State, INSTANCE_ID_LABEL};
use jobop_watch::{NamespaceWatch, PodLogOpener, WatchStreamOpener};
use kube::Client;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

fn random_postfix(len: usize) -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).map(|c| c.to_ascii_lowercase()).collect()
}

fn descriptor_kind(body: &Value, registry: &KindRegistry) -> Option<Kind> {
    body.get("kind").and_then(Value::as_str).and_then(|k| registry.get(k))
}

fn descriptor_namespace(body: &Value) -> Option<String> {
    body.get("metadata").and_then(|m| m.get("namespace")).and_then(Value::as_str).map(str::to_string)
}

fn descriptor_name(body: &Value) -> Option<String> {
    body.get("metadata").and_then(|m| m.get("name")).and_then(Value::as_str).map(str::to_string)
}

/// Drives a manifest bundle through creation to a terminal state and applies
/// a deletion policy — the resource runner / state machine (spec.md §4.G).
///
/// Cluster I/O is reached only through the injected [`ClusterBackend`],
/// [`WatchStreamOpener`], and (optionally) [`PodLogOpener`] — the same
/// seam `jobop_watch` already uses to let its fan-out and reader tests run
/// without a live apiserver. [`Runner::connect`] wires up the real
/// `kube::Client`-backed implementations; [`Runner::new`] accepts fakes
/// directly for the scenario tests in this crate's `tests` module.
pub struct Runner {
    backend: Arc<dyn ClusterBackend>,
    watch_opener: Arc<dyn WatchStreamOpener>,
    log_opener: Option<Arc<dyn PodLogOpener>>,
    cluster_default_namespace: String,
    registry: KindRegistry,
    hooks: PrepareHooks,
    bus: EventBus,
    options: RunnerOptions,
    instance_id: String,
    postfix: Option<String>,
    prepared: Mutex<Option<Vec<Value>>>,
}

impl Runner {
    /// Generic constructor taking the cluster seams directly — used by
    /// [`Runner::connect`] and by tests supplying fakes.
    pub fn new(
        backend: Arc<dyn ClusterBackend>,
        watch_opener: Arc<dyn WatchStreamOpener>,
        log_opener: Option<Arc<dyn PodLogOpener>>,
        cluster_default_namespace: impl Into<String>,
        registry: KindRegistry,
        options: RunnerOptions,
    ) -> Self {
        let postfix = options
            .name_postfix
            .clone()
            .or_else(|| (options.random_postfix_length > 0).then(|| random_postfix(options.random_postfix_length)));
        Self {
            backend,
            watch_opener,
            log_opener,
            cluster_default_namespace: cluster_default_namespace.into(),
            registry,
            hooks: PrepareHooks::bootstrap(),
            bus: EventBus::new(),
            options,
            instance_id: Uuid::new_v4().to_string(),
            postfix,
            prepared: Mutex::new(None),
        }
    }

    /// Real-cluster convenience constructor: builds a [`KubeBackend`] and
    /// [`KubeWatchOpener`] from `client`, and a [`KubeLogOpener`] when
    /// `options.show_pod_logs` is set.
    pub fn connect(client: Client, cluster_default_namespace: impl Into<String>, registry: KindRegistry, options: RunnerOptions) -> Self {
        let log_opener = if options.show_pod_logs { build_log_opener(client.clone(), &registry) } else { None };
        Self::new(
            Arc::new(KubeBackend::new(client.clone())),
            Arc::new(KubeWatchOpener::new(client)),
            log_opener,
            cluster_default_namespace,
            registry,
            options,
        )
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Registers a hook for a kind not already covered by the built-in Job
    /// and Pod preparation (SPEC_FULL.md §6, "Custom prepare hooks").
    pub fn register_custom_prepare_kind(&self, kind: &str, hook: crate::prepare::PrepareHook) {
        self.hooks.register(kind, hook);
    }

    /// Normalizes and stamps the manifest bundle. Idempotent: a second call
    /// returns the bundle computed by the first, never re-deriving names or
    /// postfixes.
    pub fn prepare(&self, source: ManifestSource) -> Result<Vec<Value>, RunnerError> {
        if let Some(bodies) = self.prepared.lock().expect("prepared lock poisoned").clone() {
            return Ok(bodies);
        }

        let default_namespace = self.options.namespace.clone().unwrap_or_else(|| self.cluster_default_namespace.clone());
        let manifests = crate::prepare::normalize(source)?;
        let mut bodies = Vec::with_capacity(manifests.len());
        for body in manifests {
            bodies.push(prepare_element(
                body,
                &self.registry,
                &self.hooks,
                &default_namespace,
                self.options.name_prefix.as_deref(),
                self.postfix.as_deref(),
                &self.instance_id,
            )?);
        }

        *self.prepared.lock().expect("prepared lock poisoned") = Some(bodies.clone());
        Ok(bodies)
    }

    /// Runs the full lifecycle of a job: prepare, discover, watch, create,
    /// wait for the primary to reach a terminal state, then apply the
    /// deletion policy (spec.md §4.G `execute_job`).
    pub async fn execute(&self, source: ManifestSource, exec_options: ExecuteOptions) -> Result<State, RunnerError> {
        let bodies = self.prepare(source)?;
        let primary = bodies.first().expect("normalize never returns an empty bundle");
        let primary_kind = descriptor_kind(primary, &self.registry)
            .ok_or_else(|| RunnerError::Validation("primary resource has an unrecognized kind".into()))?;
        let primary_namespace = descriptor_namespace(primary).expect("prepare_element always sets a namespace");
        let primary_name = descriptor_name(primary).expect("prepare_element always sets a name");

        if !primary_kind.is_parseable() {
            return Err(RunnerError::Validation(format!("primary kind {:?} has no way to resolve a state", primary_kind.name())));
        }

        let namespaces: HashSet<String> = bodies.iter().filter_map(descriptor_namespace).collect();

        let served = self.backend.discover(&self.registry).await?;
        if !served.contains(primary_kind.name()) {
            return Err(RunnerError::PrimaryKindUnavailable(primary_kind.name().to_string()));
        }
        for kind in self.registry.watchable() {
            if !served.contains(kind.name()) {
                warn!(kind = kind.name(), "kind is not served by this cluster; it will not be watched");
            }
        }

        if self.options.show_executor_logs {
            if self.options.show_runner_id_in_logs {
                info!(
                    instance_id = %self.instance_id,
                    primary_kind = primary_kind.name(),
                    primary_name = %primary_name,
                    primary_namespace = %primary_namespace,
                    namespaces = ?namespaces,
                    "starting execution"
                );
            } else {
                info!(
                    primary_kind = primary_kind.name(),
                    primary_name = %primary_name,
                    primary_namespace = %primary_namespace,
                    namespaces = ?namespaces,
                    "starting execution"
                );
            }
        }

        let watch = NamespaceWatch::new(self.registry.clone(), self.bus.clone(), self.watch_opener.clone(), self.log_opener.clone());

        let label_selector = format!("{INSTANCE_ID_LABEL}={}", self.instance_id);
        for ns in &namespaces {
            if self.options.show_watcher_logs {
                info!(namespace = %ns, "starting namespace watch");
            }
            watch.watch_namespace(ns, Some(&label_selector), None).await?;
        }

        if let Err(e) = watch.wait_until_running(Some(exec_options.watcher_start_timeout)).await {
            error!(error = %e, "watchers failed to start; aborting");
            self.abort(&watch, &bodies).await;
            return Err(RunnerError::Watch(e));
        }

        if let Err(e) = self.create_all(&served, &bodies).await {
            error!(error = %e, "failed to create one or more resources; aborting");
            self.abort(&watch, &bodies).await;
            return Err(e);
        }

        let terminal = watch
            .wait_for_status(
                Some(primary_kind.name()),
                Some(&primary_name),
                Some(&primary_namespace),
                &[State::Failed, State::Succeeded, State::Deleted],
                Some(exec_options.timeout),
            )
            .await;

        let Some(watcher) = terminal else {
            error!("timed out waiting for the primary resource to finish; aborting");
            self.abort(&watch, &bodies).await;
            return Err(RunnerError::ExecutionTimeout);
        };

        let state = watcher.state().unwrap_or(State::Failed);

        if state == State::Deleted {
            error!("primary resource was deleted while execution was running");
            self.abort(&watch, &bodies).await;
            return Err(RunnerError::PrimaryDeletedMidRun);
        }

        if state == State::Failed && self.options.show_error_logs {
            self.log_failure_context(&namespaces).await;
        }

        if self.options.delete_policy.should_delete(state) {
            self.delete_job(&bodies).await;
        }
        watch.stop_all().await;

        Ok(state)
    }

    async fn create_all(&self, served: &HashSet<String>, bodies: &[Value]) -> Result<(), RunnerError> {
        for body in bodies {
            let kind = descriptor_kind(body, &self.registry).expect("prepare_element validated the kind");
            if !served.contains(kind.name()) {
                return Err(RunnerError::KindUnavailable(kind.name().to_string()));
            }
            let namespace = descriptor_namespace(body).expect("prepare_element always sets a namespace");
            if self.options.show_operation_logs {
                info!(kind = kind.name(), name = ?descriptor_name(body), namespace = %namespace, "creating resource");
            }
            self.backend.create(&kind, &namespace, body.clone()).await?;
        }
        Ok(())
    }

    /// spec.md §4.G `delete_job`: deletes every element with a resolvable
    /// kind/name/namespace, ignoring resources already gone.
    pub async fn delete_job(&self, bodies: &[Value]) {
        let served = match self.backend.discover(&self.registry).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "could not re-discover API resources while deleting");
                return;
            }
        };
        for body in bodies {
            let (Some(kind), Some(name), Some(namespace)) =
                (descriptor_kind(body, &self.registry), descriptor_name(body), descriptor_namespace(body))
            else {
                continue;
            };
            if !served.contains(kind.name()) {
                continue;
            }
            if self.options.show_operation_logs {
                info!(kind = kind.name(), %name, %namespace, "deleting resource");
            }
            if let Err(e) = self.backend.delete(&kind, &namespace, &name).await {
                warn!(kind = kind.name(), %name, error = %e, "failed to delete resource");
            }
        }
    }

    /// spec.md §4.G: delete the job's resources and stop every watcher —
    /// used on timeout and on mid-run deletion.
    async fn abort(&self, watch: &NamespaceWatch, bodies: &[Value]) {
        self.delete_job(bodies).await;
        watch.stop_all().await;
    }

    /// Enumerates every labeled object across every watchable kind and
    /// namespace and logs its parsed state — a live relist rather than a
    /// dump of whatever the in-memory watchers happened to observe, so a
    /// kind whose reader never delivered an event (spec.md §4.G step 9)
    /// still shows up in the diagnostics.
    async fn log_failure_context(&self, namespaces: &HashSet<String>) {
        let label_selector = format!("{INSTANCE_ID_LABEL}={}", self.instance_id);
        for kind in self.registry.watchable() {
            for namespace in namespaces {
                let objects = match self.backend.list(&kind, namespace, &label_selector).await {
                    Ok(objects) => objects,
                    Err(e) => {
                        warn!(kind = kind.name(), namespace = %namespace, error = %e, "failed to list objects for failure diagnostics");
                        continue;
                    }
                };
                for object in &objects {
                    warn!(
                        kind = kind.name(),
                        name = descriptor_name(object).as_deref().unwrap_or("?"),
                        namespace = %namespace,
                        state = ?kind.parse_state(object, false),
                        "object state at failure"
                    );
                }
            }
        }
        self.bus.emit("error", EventPayload::Warning("execution failed".to_string()));
    }
}

fn build_log_opener(client: Client, registry: &KindRegistry) -> Option<Arc<dyn PodLogOpener>> {
    let pod_kind = registry.get("pod")?;
    Some(Arc::new(KubeLogOpener::new(client, pod_kind)))
}
