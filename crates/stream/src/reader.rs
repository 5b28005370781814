use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::factory::ResponseFactory;
use bytes::BytesMut;
use futures::StreamExt;
use jobop_core::{Event, EventBus, EventPayload};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One reconnecting, line-framed read loop over a [`ResponseFactory`]
/// (spec.md §4.B). A reader is single-use per `start()`/stop cycle: it
/// refuses a second `start()` while already streaming, matching the
/// Python `ThreadedKubernetesWatch` guard against starting the same
/// thread twice.
pub struct StreamReader {
    factory: Arc<dyn ResponseFactory>,
    bus: EventBus,
    config: StreamConfig,
    streaming: Arc<AtomicBool>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamReader {
    pub fn new(factory: Arc<dyn ResponseFactory>, bus: EventBus, config: StreamConfig) -> Self {
        Self {
            factory,
            bus,
            config,
            streaming: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Generator mode (spec.md §4.B): starts the reader and returns a
    /// channel that yields every `data_event_name` event. The three
    /// subscriptions unregister themselves (dropping their channel sender)
    /// as soon as `"stopped"` or `"error"` fires, so the channel closes and
    /// the caller's `while let Some(event) = rx.recv().await` loop ends on
    /// its own instead of requiring the caller to recognize a sentinel.
    pub fn start_generator(&self) -> Result<mpsc::Receiver<Event>, StreamError> {
        let (tx, rx) = mpsc::channel(256);
        let data_name = self.config.data_event_name.clone();

        let data_id = Arc::new(Mutex::new(None));
        let stopped_id = Arc::new(Mutex::new(None));
        let error_id = Arc::new(Mutex::new(None));

        let tx_data = tx.clone();
        let id = self.bus.on(&data_name, move |e| {
            let _ = tx_data.try_send(e.clone());
        });
        *data_id.lock().expect("id lock poisoned") = Some(id);

        let unsubscribe_all = {
            let bus = self.bus.clone();
            let data_name = data_name.clone();
            let data_id = data_id.clone();
            let stopped_id = stopped_id.clone();
            let error_id = error_id.clone();
            move || {
                if let Some(id) = data_id.lock().expect("id lock poisoned").take() {
                    bus.off(&data_name, id);
                }
                if let Some(id) = stopped_id.lock().expect("id lock poisoned").take() {
                    bus.off("stopped", id);
                }
                if let Some(id) = error_id.lock().expect("id lock poisoned").take() {
                    bus.off("error", id);
                }
            }
        };

        let tx_stopped = tx.clone();
        let unsub = unsubscribe_all.clone();
        let id = self.bus.on("stopped", move |e| {
            let _ = tx_stopped.try_send(e.clone());
            unsub();
        });
        *stopped_id.lock().expect("id lock poisoned") = Some(id);

        let id = self.bus.on("error", move |e| {
            let _ = tx.try_send(e.clone());
            unsubscribe_all();
        });
        *error_id.lock().expect("id lock poisoned") = Some(id);

        self.start_async()?;
        Ok(rx)
    }

    /// Async mode: runs the loop to completion, emitting only via the
    /// event bus. Returns the task handle so a caller can await `stop`.
    pub fn start_async(&self) -> Result<(), StreamError> {
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStreaming);
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel lock poisoned") = cancel.clone();

        let factory = self.factory.clone();
        let bus = self.bus.clone();
        let config = self.config.clone();
        let streaming = self.streaming.clone();
        let handle = tokio::spawn(async move {
            run_loop(factory, bus, config, cancel).await;
            streaming.store(false, Ordering::SeqCst);
        });
        *self.task.lock().expect("task lock poisoned") = Some(handle);
        Ok(())
    }

    /// Requests a clean shutdown: the loop finishes the chunk it's waiting
    /// on, emits `"stopped"`, and exits. Does not forcibly interrupt a
    /// stuck `factory.open()` — see [`Self::abort`].
    pub fn stop(&self) {
        self.cancel.lock().expect("cancel lock poisoned").cancel();
    }

    /// Like [`Self::stop`], but also aborts the task outright if it hasn't
    /// reached a cancellation point (spec.md §4.B "graceful vs forced
    /// shutdown").
    pub fn abort(&self) {
        self.cancel.lock().expect("cancel lock poisoned").cancel();
        if let Some(handle) = self.task.lock().expect("task lock poisoned").take() {
            handle.abort();
        }
        self.streaming.store(false, Ordering::SeqCst);
    }
}

async fn run_loop(factory: Arc<dyn ResponseFactory>, bus: EventBus, config: StreamConfig, cancel: CancellationToken) {
    let mut was_started = false;
    let mut attempts: u32 = 0;
    let mut buf = BytesMut::new();

    'outer: loop {
        if cancel.is_cancelled() {
            break;
        }

        let opened = match tokio::time::timeout(config.response_wait_timeout, factory.open()).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Timeout),
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) if e.is_transient() => {
                attempts += 1;
                if attempts > config.reconnect_max_retries {
                    bus.emit("error", EventPayload::Error(StreamError::MaxRetriesExceeded(config.reconnect_max_retries).to_string()));
                    break 'outer;
                }
                bus.emit("warning", EventPayload::Warning(e.to_string()));
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer,
                    _ = tokio::time::sleep(config.reconnect_wait_timeout) => {}
                }
                continue 'outer;
            }
            Err(e) if e.is_not_found_or_bad_request() && was_started && config.ignore_errors_if_removed => {
                break 'outer;
            }
            Err(e) => {
                bus.emit("error", EventPayload::Error(e.to_string()));
                break 'outer;
            }
        };

        attempts = 0;
        if !was_started {
            was_started = true;
            bus.emit("started", EventPayload::None);
        }
        buf.clear();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                next = stream.next() => {
                    match next {
                        Some(Ok(chunk)) => {
                            buf.extend_from_slice(&chunk);
                            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                                let line = buf.split_to(pos);
                                let _ = buf.split_to(1);
                                emit_line(&bus, &config, &line);
                            }
                        }
                        Some(Err(e)) if e.is_transient() => {
                            attempts += 1;
                            if attempts > config.reconnect_max_retries {
                                bus.emit("error", EventPayload::Error(StreamError::MaxRetriesExceeded(config.reconnect_max_retries).to_string()));
                                break 'outer;
                            }
                            bus.emit("warning", EventPayload::Warning(e.to_string()));
                            tokio::select! {
                                _ = cancel.cancelled() => break 'outer,
                                _ = tokio::time::sleep(config.reconnect_wait_timeout) => {}
                            }
                            continue 'outer;
                        }
                        Some(Err(e)) if e.is_not_found_or_bad_request() && config.ignore_errors_if_removed => {
                            break 'outer;
                        }
                        Some(Err(e)) => {
                            bus.emit("error", EventPayload::Error(e.to_string()));
                            break 'outer;
                        }
                        None => {
                            // Response body ended cleanly; reconnect without
                            // counting it as a failure.
                            continue 'outer;
                        }
                    }
                }
            }
        }
    }

    if !buf.is_empty() {
        let line = buf.split();
        emit_line(&bus, &config, &line);
    }
    bus.emit("stopped", EventPayload::None);
}

fn emit_line(bus: &EventBus, config: &StreamConfig, line: &[u8]) {
    let text = match std::str::from_utf8(line) {
        Ok(s) => s,
        Err(_) => {
            warn!("dropped non-UTF-8 line");
            return;
        }
    };
    if config.read_as_object {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => bus.emit(&config.data_event_name, EventPayload::Json(value)),
            Err(e) => bus.emit("warning", EventPayload::Warning(StreamError::Json(e.to_string()).to_string())),
        }
    } else {
        bus.emit(&config.data_event_name, EventPayload::Line(text.to_string()));
    }
}
