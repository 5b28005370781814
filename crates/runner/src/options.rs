use jobop_core::DeletePolicy;
use std::time::Duration;

/// Constructor-time options (spec.md §6 "Configuration options").
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub namespace: Option<String>,
    pub show_pod_logs: bool,
    pub show_operation_logs: bool,
    pub show_watcher_logs: bool,
    pub show_executor_logs: bool,
    pub show_error_logs: bool,
    pub delete_policy: DeletePolicy,
    pub auto_load_kube_config: bool,
    /// Length of a random alphanumeric name suffix generated when no
    /// explicit `name_postfix` is given and this is `> 0` (default 8,
    /// matching the Python source's `random_name_postfix_length`).
    pub random_postfix_length: usize,
    pub name_prefix: Option<String>,
    pub name_postfix: Option<String>,
    /// `KUBERNETES_JOB_OPERATOR_SHOW_RUNNER_ID_IN_LOGS` (spec.md §6).
    pub show_runner_id_in_logs: bool,
}

impl RunnerOptions {
    /// Reads `show_runner_id_in_logs`'s default from the environment.
    /// `KUBERNETES_JOB_OPERATOR_SHOW_RUNNER_ID_IN_LOGS` is the variable name
    /// spec.md §6 documents; `JOB_RUNNER_SHOW_RUNNER_ID_IN_LOGS` is accepted
    /// too, for consistency with this crate's other `JOB_RUNNER_*` flags, and
    /// wins if both are set.
    pub fn from_env() -> Self {
        let show_runner_id_in_logs = std::env::var("JOB_RUNNER_SHOW_RUNNER_ID_IN_LOGS")
            .or_else(|_| std::env::var("KUBERNETES_JOB_OPERATOR_SHOW_RUNNER_ID_IN_LOGS"))
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self { show_runner_id_in_logs, ..Self::default() }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            show_pod_logs: true,
            show_operation_logs: true,
            show_watcher_logs: true,
            show_executor_logs: true,
            show_error_logs: true,
            delete_policy: DeletePolicy::IfSucceeded,
            auto_load_kube_config: true,
            random_postfix_length: 8,
            name_prefix: None,
            name_postfix: None,
            show_runner_id_in_logs: false,
        }
    }
}

/// Per-call options for [`crate::runner::Runner::execute`] (spec.md §6).
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub timeout: Duration,
    pub watcher_start_timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5 * 60), watcher_start_timeout: Duration::from_secs(10) }
    }
}
