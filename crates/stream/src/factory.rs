use crate::error::StreamError;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;

/// A chunk of the raw response body, or a transport-level error.
pub type BytesItem = Result<bytes::Bytes, StreamError>;

/// A boxed stream of chunks — what `kube::Client::request_events` /
/// `request_text_stream` hand back once a connection is open.
pub type BytesStream = Pin<Box<dyn Stream<Item = BytesItem> + Send>>;

pub type OpenFuture = Pin<Box<dyn Future<Output = Result<BytesStream, StreamError>> + Send>>;

/// Opens (and, on reconnect, re-opens) the underlying chunked HTTP
/// response. A real implementation wraps a `kube::Client` GET against a
/// `Kind::compose_resource_path` URL with `?watch=true` or `?follow=true`;
/// tests supply a fake that replays canned chunks or errors
/// (SPEC_FULL.md §4.B, §5 Test Tooling).
pub trait ResponseFactory: Send + Sync {
    fn open(&self) -> OpenFuture;
}

impl<F> ResponseFactory for F
where
    F: Fn() -> OpenFuture + Send + Sync,
{
    fn open(&self) -> OpenFuture {
        (self)()
    }
}
