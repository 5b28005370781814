//! Resilient, reconnecting line-framed stream reader (component B):
//! reopens a chunked HTTP response on transient failure, emits decoded
//! lines and lifecycle events over a [`jobop_core::EventBus`], and
//! supports both a fire-and-forget async mode and a generator mode that
//! hands back an `mpsc::Receiver` (spec.md §4.B).

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod factory;
pub mod reader;

pub use config::StreamConfig;
pub use error::StreamError;
pub use factory::{BytesItem, BytesStream, OpenFuture, ResponseFactory};
pub use reader::StreamReader;
