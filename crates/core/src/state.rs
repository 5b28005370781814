use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a watched Kubernetes object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Pending,
    Active,
    Running,
    Succeeded,
    Failed,
    Deleted,
}

impl State {
    /// True once the object can no longer transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Succeeded | State::Failed | State::Deleted)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Pending => "Pending",
            State::Active => "Active",
            State::Running => "Running",
            State::Succeeded => "Succeeded",
            State::Failed => "Failed",
            State::Deleted => "Deleted",
        };
        f.write_str(s)
    }
}

/// Job state parser: `failed > backoffLimit` wins over `startTime`/
/// `completionTime` presence.
pub fn parse_state_job(body: &serde_json::Value) -> State {
    let status = body.get("status");
    let spec = body.get("spec");
    let back_off_limit = spec
        .and_then(|s| s.get("backoffLimit"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let failed = status.and_then(|s| s.get("failed")).and_then(|v| v.as_i64());
    if let Some(failed) = failed {
        if failed > back_off_limit {
            return State::Failed;
        }
    }
    let has_start = status.and_then(|s| s.get("startTime")).is_some();
    let has_completion = status.and_then(|s| s.get("completionTime")).is_some();
    if has_start && has_completion {
        State::Succeeded
    } else if has_start {
        State::Running
    } else {
        State::Pending
    }
}

/// Pod state parser: a `BackOff` waiting reason or a top-level container
/// `error` state always wins; otherwise `phase` maps 1:1, with unknown
/// phases normalized to `Active` rather than passed through raw.
pub fn parse_state_pod(body: &serde_json::Value) -> State {
    let status = body.get("status");
    if let Some(statuses) = status
        .and_then(|s| s.get("containerStatuses"))
        .and_then(|v| v.as_array())
    {
        for cs in statuses {
            let Some(state) = cs.get("state") else { continue };
            if let Some(reason) = state
                .get("waiting")
                .and_then(|w| w.get("reason"))
                .and_then(|v| v.as_str())
            {
                if reason.contains("BackOff") {
                    return State::Failed;
                }
            }
            if state.get("error").is_some() {
                return State::Failed;
            }
        }
    }
    match status.and_then(|s| s.get("phase")).and_then(|v| v.as_str()) {
        Some("Pending") => State::Pending,
        Some("Running") => State::Running,
        Some("Succeeded") => State::Succeeded,
        Some("Failed") => State::Failed,
        _ => State::Active,
    }
}

/// Default parser for kinds without a dedicated rule: always `Active`.
pub fn parse_state_default(_body: &serde_json::Value) -> State {
    State::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_failed_exceeds_backoff() {
        let body = json!({"status": {"failed": 2}, "spec": {"backoffLimit": 1}});
        assert_eq!(parse_state_job(&body), State::Failed);
    }

    #[test]
    fn job_failed_within_backoff_but_no_start_is_pending() {
        let body = json!({"status": {"failed": 1}, "spec": {"backoffLimit": 1}});
        assert_eq!(parse_state_job(&body), State::Pending);
    }

    #[test]
    fn job_succeeded_has_both_timestamps() {
        let body = json!({"status": {"startTime": "t0", "completionTime": "t1"}, "spec": {}});
        assert_eq!(parse_state_job(&body), State::Succeeded);
    }

    #[test]
    fn job_running_has_only_start() {
        let body = json!({"status": {"startTime": "t0"}, "spec": {}});
        assert_eq!(parse_state_job(&body), State::Running);
    }

    #[test]
    fn pod_backoff_wins_over_phase() {
        let body = json!({
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"state": {"waiting": {"reason": "CrashLoopBackOff"}}}
                ]
            }
        });
        assert_eq!(parse_state_pod(&body), State::Failed);
    }

    #[test]
    fn pod_phase_maps_directly() {
        let body = json!({"status": {"phase": "Succeeded"}});
        assert_eq!(parse_state_pod(&body), State::Succeeded);
    }

    #[test]
    fn pod_unknown_phase_normalizes_to_active() {
        let body = json!({"status": {"phase": "Unknown"}});
        assert_eq!(parse_state_pod(&body), State::Active);
    }
}
