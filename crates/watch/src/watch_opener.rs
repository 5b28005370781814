use jobop_core::Kind;
use jobop_stream::ResponseFactory;
use std::sync::Arc;

/// Supplies the chunked HTTP response backing one `(namespace, kind)` watch
/// (spec.md §4.F). Kept separate from the fan-out logic so tests can
/// replay canned watch events without a cluster.
pub trait WatchStreamOpener: Send + Sync {
    fn open_watch(
        &self,
        namespace: &str,
        kind: &Kind,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Arc<dyn ResponseFactory>;
}
