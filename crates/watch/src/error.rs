use jobop_core::CoreError;
use jobop_stream::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("namespace {0:?} is already being watched")]
    AlreadyWatched(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("object manifest is missing required metadata: {0}")]
    MissingMetadata(&'static str),

    #[error("timed out waiting for watchers to start")]
    StartupTimeout,

    #[error("a watcher ended before it was able to start")]
    ReaderFailedBeforeStart,
}
