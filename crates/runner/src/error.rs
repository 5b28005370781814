use thiserror::Error;

/// Execution errors surfaced by [`crate::runner::Runner`] (spec.md §7's
/// taxonomy: validation, API discovery, execution timeout, primary deleted
/// mid-run). Transient stream errors never reach this type — they're
/// handled inside `jobop-stream`/`jobop-watch` and only escalate here as
/// [`RunnerError::Watch`] once they've already given up.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("manifest validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Core(#[from] jobop_core::CoreError),

    #[error(transparent)]
    Watch(#[from] jobop_watch::WatchError),

    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to parse manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("the primary resource's kind {0:?} was not found on the cluster")]
    PrimaryKindUnavailable(String),

    #[error("kind {0:?} is not served by this cluster and cannot be created")]
    KindUnavailable(String),

    #[error("timed out waiting for the primary resource to reach a terminal state")]
    ExecutionTimeout,

    #[error("resource deleted during execution")]
    PrimaryDeletedMidRun,
}
