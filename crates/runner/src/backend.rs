use crate::error::RunnerError;
use async_trait::async_trait;
use jobop_core::{Kind, KindRegistry};
use serde_json::Value;
use std::collections::HashSet;

/// Cluster operations the runner needs beyond watching: API discovery,
/// resource creation, and deletion. Kept behind a trait, the same way
/// `jobop_watch::WatchStreamOpener`/`PodLogOpener` abstract the streaming
/// side — so `Runner::execute`'s control flow (spec.md §4.G, the scenarios
/// in §8) can be exercised against a fake cluster in tests instead of
/// requiring a live apiserver.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// The subset of `registry`'s kind names actually served by the
    /// cluster (spec.md §4.G step 2, "Discover available API kinds").
    async fn discover(&self, registry: &KindRegistry) -> Result<HashSet<String>, RunnerError>;

    async fn create(&self, kind: &Kind, namespace: &str, body: Value) -> Result<(), RunnerError>;

    /// Deletes `name`; a 404 means the object is already gone and is not
    /// treated as an error (spec.md §4.G `delete_job`).
    async fn delete(&self, kind: &Kind, namespace: &str, name: &str) -> Result<(), RunnerError>;

    /// Lists every object of `kind` in `namespace` matching `label_selector`
    /// (spec.md §4.G step 9 / §7: on `Failed`, the runner enumerates every
    /// labeled object across all kinds and namespaces to dump its status,
    /// not just the ones a watcher happened to observe an event for).
    async fn list(&self, kind: &Kind, namespace: &str, label_selector: &str) -> Result<Vec<Value>, RunnerError>;
}
