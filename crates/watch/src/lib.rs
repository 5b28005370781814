//! Namespace watch fan-out and per-object state tracking (components E/F):
//! one [`object::ObjectWatcher`] state machine per distinct Kubernetes
//! object observed across a namespace's watched kinds, and a
//! [`fanout::NamespaceWatch`] that owns the per-kind readers and exposes
//! predicate-based blocking waits over the resulting object table.

#![forbid(unsafe_code)]

pub mod error;
pub mod fanout;
pub mod log_opener;
pub mod object;
pub mod watch_opener;

pub use error::WatchError;
pub use fanout::NamespaceWatch;
pub use log_opener::PodLogOpener;
pub use object::{compose_object_id, ObjectWatcher};
pub use watch_opener::WatchStreamOpener;
