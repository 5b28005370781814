use std::time::Duration;

/// Tunables for [`crate::reader::StreamReader`] (spec.md §4.B / §6).
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long to wait for the initial response before treating the open
    /// as failed.
    pub response_wait_timeout: Duration,
    /// Delay before re-opening the connection after a transient failure.
    pub reconnect_wait_timeout: Duration,
    /// Consecutive transient failures tolerated before giving up and
    /// emitting `"error"`.
    pub reconnect_max_retries: u32,
    /// If the stream had already delivered at least one line and then the
    /// underlying object disappears (404/400), treat that as a normal end
    /// of stream rather than an error.
    pub ignore_errors_if_removed: bool,
    /// Parse each line as JSON and emit `EventPayload::Json`; otherwise
    /// emit the raw line as `EventPayload::Line`.
    pub read_as_object: bool,
    /// Event name used for each decoded line (default `"data"`).
    pub data_event_name: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            response_wait_timeout: Duration::from_secs(30),
            reconnect_wait_timeout: Duration::from_secs(2),
            reconnect_max_retries: 10,
            ignore_errors_if_removed: true,
            read_as_object: false,
            data_event_name: "data".to_string(),
        }
    }
}
