use jobop_stream::ResponseFactory;
use std::sync::Arc;

/// Supplies the chunked HTTP response a Pod's attached log reader pulls
/// from. Kept separate from `jobop-watch`'s Kubernetes-agnostic core so
/// tests can fake it; the runner wires in an implementation backed by
/// `kube::Api::log_stream` (spec.md §4.E).
pub trait PodLogOpener: Send + Sync {
    /// `follow=true` for a live tail (Pod is `Running`); `follow=false` for a
    /// one-shot read of the full log (Pod has already left `Running` for a
    /// terminal state — spec.md §4.E).
    fn open_pod_log(&self, namespace: &str, pod_name: &str, follow: bool) -> Arc<dyn ResponseFactory>;
}
