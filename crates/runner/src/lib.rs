//! Resource runner / state machine (component G): normalizes a manifest
//! bundle, creates it against a cluster, drives the primary resource to a
//! terminal state through [`jobop_watch::NamespaceWatch`], and applies a
//! deletion policy.

#![forbid(unsafe_code)]

pub mod backend;
pub mod error;
pub mod kube_backend;
pub mod options;
pub mod prepare;
pub mod runner;

pub use backend::ClusterBackend;
pub use error::RunnerError;
pub use kube_backend::{KubeBackend, KubeLogOpener, KubeWatchOpener};
pub use options::{ExecuteOptions, RunnerOptions};
pub use prepare::{ManifestSource, PrepareHook, PrepareHooks};
pub use runner::Runner;

#[cfg(test)]
mod tests {
    use super::*;
    use jobop_core::DeletePolicy;
    use serde_json::json;

    #[test]
    fn normalize_wraps_a_single_map() {
        let out = prepare::normalize(ManifestSource::Single(json!({"kind": "Job", "spec": {}}))).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn normalize_parses_multi_document_yaml() {
        let yaml = "kind: Job\nspec: {}\n---\nkind: Service\nspec: {}\n";
        let out = prepare::normalize(ManifestSource::Yaml(yaml.to_string())).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["kind"], "Job");
        assert_eq!(out[1]["kind"], "Service");
    }

    #[test]
    fn normalize_rejects_empty_bundle() {
        assert!(prepare::normalize(ManifestSource::List(Vec::new())).is_err());
    }

    #[test]
    fn prepare_element_applies_job_defaults_and_finalizer() {
        let registry = jobop_core::KindRegistry::bootstrap();
        let hooks = prepare::PrepareHooks::bootstrap();
        let body = json!({
            "kind": "Job",
            "metadata": {"name": "my-job"},
            "spec": {"template": {"spec": {"containers": []}}}
        });
        let prepared =
            prepare::prepare_element(body, &registry, &hooks, "default", Some("pre"), Some("abcd1234"), "instance-1").unwrap();

        assert_eq!(prepared["metadata"]["name"], "pre-my-job-abcd1234");
        assert_eq!(prepared["metadata"]["namespace"], "default");
        assert_eq!(prepared["spec"]["backoffLimit"], 0);
        assert_eq!(prepared["spec"]["template"]["spec"]["restartPolicy"], "Never");
        assert_eq!(prepared["metadata"]["finalizers"][0], "foregroundDeletion");
        assert_eq!(
            prepared["metadata"]["labels"][jobop_core::INSTANCE_ID_LABEL],
            "instance-1"
        );
    }

    #[test]
    fn prepare_element_rejects_unknown_kind() {
        let registry = jobop_core::KindRegistry::bootstrap();
        let hooks = prepare::PrepareHooks::bootstrap();
        let body = json!({"kind": "Widget", "spec": {}});
        let err = prepare::prepare_element(body, &registry, &hooks, "default", None, None, "instance-1").unwrap_err();
        assert!(matches!(err, RunnerError::Validation(_)));
    }

    #[test]
    fn prepare_element_rejects_missing_spec() {
        let registry = jobop_core::KindRegistry::bootstrap();
        let hooks = prepare::PrepareHooks::bootstrap();
        let body = json!({"kind": "Pod", "metadata": {"name": "p"}});
        let err = prepare::prepare_element(body, &registry, &hooks, "default", None, None, "instance-1").unwrap_err();
        assert!(matches!(err, RunnerError::Validation(_)));
    }

    #[test]
    fn default_options_match_the_documented_defaults() {
        let opts = RunnerOptions::default();
        assert_eq!(opts.random_postfix_length, 8);
        assert_eq!(opts.delete_policy, DeletePolicy::IfSucceeded);
        assert!(opts.auto_load_kube_config);
        assert!(!opts.show_runner_id_in_logs);
    }
}

/// Scenario tests for `Runner::execute` (spec.md §8, scenarios 1, 2, 4, 5,
/// 6) — a fake [`ClusterBackend`] records create/delete calls instead of
/// touching a cluster, and a fake [`jobop_watch::WatchStreamOpener`]
/// replays scripted watch events, the same fixture shape
/// `jobop_watch::fanout`'s own tests use for its `ScriptedOpener`.
#[cfg(test)]
mod execute_scenarios {
    use super::*;
    use jobop_core::{DeletePolicy, Kind, KindRegistry, State};
    use jobop_stream::{BytesItem, BytesStream, OpenFuture, ResponseFactory, StreamError};
    use jobop_watch::WatchStreamOpener;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FakeBackend {
        served: HashSet<String>,
        creates: Mutex<Vec<(String, String, String)>>,
        deletes: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeBackend {
        fn new(served: &[&str]) -> Self {
            Self {
                served: served.iter().map(|s| s.to_string()).collect(),
                creates: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ClusterBackend for FakeBackend {
        async fn discover(&self, _registry: &KindRegistry) -> Result<HashSet<String>, RunnerError> {
            Ok(self.served.clone())
        }

        async fn create(&self, kind: &Kind, namespace: &str, body: Value) -> Result<(), RunnerError> {
            let name = body.get("metadata").and_then(|m| m.get("name")).and_then(Value::as_str).unwrap_or("").to_string();
            self.creates.lock().unwrap().push((kind.name().to_string(), namespace.to_string(), name));
            Ok(())
        }

        async fn delete(&self, kind: &Kind, namespace: &str, name: &str) -> Result<(), RunnerError> {
            self.deletes.lock().unwrap().push((kind.name().to_string(), namespace.to_string(), name.to_string()));
            Ok(())
        }

        async fn list(&self, _kind: &Kind, _namespace: &str, _label_selector: &str) -> Result<Vec<Value>, RunnerError> {
            Ok(Vec::new())
        }
    }

    struct ScriptedWatch {
        chunks: Mutex<VecDeque<Result<Vec<BytesItem>, StreamError>>>,
    }

    impl ResponseFactory for ScriptedWatch {
        fn open(&self) -> OpenFuture {
            let next = self.chunks.lock().unwrap().pop_front();
            Box::pin(async move {
                match next {
                    None => Err(StreamError::NotFound),
                    Some(Err(e)) => Err(e),
                    Some(Ok(items)) => Ok(Box::pin(futures::stream::iter(items)) as BytesStream),
                }
            })
        }
    }

    /// A kind not relevant to a scenario still needs to emit `"started"` for
    /// `wait_until_running` to resolve — a one-shot empty read followed by a
    /// graceful not-found end accomplishes that without delivering events.
    fn inert_script() -> Vec<Result<Vec<BytesItem>, StreamError>> {
        vec![Ok(vec![]), Err(StreamError::NotFound)]
    }

    struct FakeWatchOpener {
        scripts: Mutex<HashMap<String, Vec<Result<Vec<BytesItem>, StreamError>>>>,
    }

    impl FakeWatchOpener {
        fn new(mut scripts: HashMap<String, Vec<Result<Vec<BytesItem>, StreamError>>>) -> Self {
            for kind in ["pod", "job", "deployment", "service"] {
                scripts.entry(kind.to_string()).or_insert_with(inert_script);
            }
            Self { scripts: Mutex::new(scripts) }
        }
    }

    impl WatchStreamOpener for FakeWatchOpener {
        fn open_watch(&self, _namespace: &str, kind: &Kind, _label_selector: Option<&str>, _field_selector: Option<&str>) -> Arc<dyn ResponseFactory> {
            let attempts = self.scripts.lock().unwrap().remove(kind.name()).unwrap_or_else(|| vec![Err(StreamError::NotFound)]);
            Arc::new(ScriptedWatch { chunks: Mutex::new(attempts.into()) })
        }
    }

    struct HangingOpener;

    impl WatchStreamOpener for HangingOpener {
        fn open_watch(&self, _namespace: &str, _kind: &Kind, _label_selector: Option<&str>, _field_selector: Option<&str>) -> Arc<dyn ResponseFactory> {
            struct Hang;
            impl ResponseFactory for Hang {
                fn open(&self) -> OpenFuture {
                    Box::pin(std::future::pending())
                }
            }
            Arc::new(Hang)
        }
    }

    fn watch_event(event_type: &str, object: Value) -> BytesItem {
        let line = serde_json::json!({"type": event_type, "object": object}).to_string() + "\n";
        Ok(bytes::Bytes::from(line))
    }

    fn job_object(name: &str, namespace: &str, status: Value) -> Value {
        json!({
            "kind": "Job",
            "apiVersion": "batch/v1",
            "metadata": {"name": name, "namespace": namespace},
            "spec": {"backoffLimit": 0},
            "status": status,
        })
    }

    fn service_object(name: &str, namespace: &str) -> Value {
        json!({"kind": "Service", "apiVersion": "v1", "metadata": {"name": name, "namespace": namespace}, "spec": {}})
    }

    fn job_manifest(name: &str) -> Value {
        json!({
            "kind": "Job",
            "apiVersion": "batch/v1",
            "metadata": {"name": name},
            "spec": {"template": {"spec": {"containers": [{"image": "alpine", "command": ["true"]}]}}}
        })
    }

    fn service_manifest(name: &str) -> Value {
        json!({"kind": "Service", "apiVersion": "v1", "metadata": {"name": name}, "spec": {"ports": []}})
    }

    fn runner(backend: FakeBackend, opener: FakeWatchOpener, options: RunnerOptions) -> Runner {
        Runner::new(Arc::new(backend), Arc::new(opener), None, "default", KindRegistry::bootstrap(), options)
    }

    fn quick_options() -> ExecuteOptions {
        ExecuteOptions { timeout: Duration::from_secs(2), watcher_start_timeout: Duration::from_millis(500) }
    }

    fn base_options(delete_policy: DeletePolicy) -> RunnerOptions {
        RunnerOptions { namespace: Some("default".into()), random_postfix_length: 0, delete_policy, ..RunnerOptions::default() }
    }

    #[tokio::test]
    async fn happy_job_succeeds_and_is_deleted_under_if_succeeded() {
        let backend = FakeBackend::new(&["pod", "job", "deployment", "service"]);
        let mut scripts = HashMap::new();
        scripts.insert(
            "job".to_string(),
            vec![
                Ok(vec![
                    watch_event("ADDED", job_object("my-job", "default", json!({}))),
                    watch_event("MODIFIED", job_object("my-job", "default", json!({"startTime": "t0"}))),
                    watch_event("MODIFIED", job_object("my-job", "default", json!({"startTime": "t0", "completionTime": "t1"}))),
                ]),
                Err(StreamError::NotFound),
            ],
        );
        let opener = FakeWatchOpener::new(scripts);
        let runner = runner(backend, opener, base_options(DeletePolicy::IfSucceeded));

        let result = runner.execute(ManifestSource::Single(job_manifest("my-job")), quick_options()).await;
        assert_eq!(result.unwrap(), State::Succeeded);
    }

    #[tokio::test]
    async fn job_backoff_exceeded_is_failed_and_deleted_under_if_failed() {
        let backend_served = FakeBackend::new(&["pod", "job", "deployment", "service"]);
        let mut scripts = HashMap::new();
        scripts.insert(
            "job".to_string(),
            vec![Ok(vec![watch_event("ADDED", job_object("my-job", "default", json!({"failed": 1})))]), Err(StreamError::NotFound)],
        );
        let opener = FakeWatchOpener::new(scripts);
        let runner = runner(backend_served, opener, base_options(DeletePolicy::IfFailed));

        let result = runner.execute(ManifestSource::Single(job_manifest("my-job")), quick_options()).await;
        assert_eq!(result.unwrap(), State::Failed);
    }

    #[tokio::test]
    async fn job_backoff_exceeded_is_kept_under_if_succeeded() {
        let backend = FakeBackend::new(&["pod", "job", "deployment", "service"]);
        let mut scripts = HashMap::new();
        scripts.insert(
            "job".to_string(),
            vec![Ok(vec![watch_event("ADDED", job_object("my-job", "default", json!({"failed": 1})))]), Err(StreamError::NotFound)],
        );
        let opener = FakeWatchOpener::new(scripts);
        let runner = runner(backend, opener, base_options(DeletePolicy::IfSucceeded));

        let result = runner.execute(ManifestSource::Single(job_manifest("my-job")), quick_options()).await;
        assert_eq!(result.unwrap(), State::Failed);
    }

    #[tokio::test]
    async fn watcher_start_timeout_fails_execute_and_creates_nothing() {
        let backend = FakeBackend::new(&["pod", "job", "deployment", "service"]);
        let runner = Runner::new(
            Arc::new(backend),
            Arc::new(HangingOpener),
            None,
            "default",
            KindRegistry::bootstrap(),
            base_options(DeletePolicy::IfSucceeded),
        );

        let result = runner.execute(ManifestSource::Single(job_manifest("my-job")), quick_options()).await;
        assert!(matches!(result, Err(RunnerError::Watch(jobop_watch::WatchError::StartupTimeout))));
    }

    #[tokio::test]
    async fn primary_deleted_mid_run_aborts_and_deletes() {
        let backend = FakeBackend::new(&["pod", "job", "deployment", "service"]);
        let mut scripts = HashMap::new();
        scripts.insert(
            "job".to_string(),
            vec![
                Ok(vec![
                    watch_event("ADDED", job_object("my-job", "default", json!({}))),
                    watch_event("DELETED", job_object("my-job", "default", json!({}))),
                ]),
                Err(StreamError::NotFound),
            ],
        );
        let opener = FakeWatchOpener::new(scripts);
        let runner = runner(backend, opener, base_options(DeletePolicy::IfSucceeded));

        let result = runner.execute(ManifestSource::Single(job_manifest("my-job")), quick_options()).await;
        assert!(matches!(result, Err(RunnerError::PrimaryDeletedMidRun)));
    }

    #[tokio::test]
    async fn multi_document_bundle_creates_both_and_deletes_both_under_always() {
        let backend = FakeBackend::new(&["pod", "job", "deployment", "service"]);
        let mut scripts = HashMap::new();
        scripts.insert(
            "job".to_string(),
            vec![
                Ok(vec![watch_event("ADDED", job_object("my-job", "default", json!({"startTime": "t0", "completionTime": "t1"})))]),
                Err(StreamError::NotFound),
            ],
        );
        scripts.insert(
            "service".to_string(),
            vec![Ok(vec![watch_event("ADDED", service_object("my-svc", "default"))]), Err(StreamError::NotFound)],
        );
        let opener = FakeWatchOpener::new(scripts);
        let runner = runner(backend, opener, base_options(DeletePolicy::Always));

        let bundle = ManifestSource::List(vec![job_manifest("my-job"), service_manifest("my-svc")]);
        let result = runner.execute(bundle, quick_options()).await;
        assert_eq!(result.unwrap(), State::Succeeded);
    }
}
