use crate::state::{parse_state_default, parse_state_job, parse_state_pod, State};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A function pointer, not a trait object — a `Kind` is plain data carrying
/// its state-parsing behavior as a value, rather than an inheritance
/// hierarchy of kind-specific types.
pub type ParseStateFn = fn(&serde_json::Value) -> State;

#[derive(Debug, Clone)]
pub struct Kind {
    name: String,
    api_version: String,
    parse_state_fn: Option<ParseStateFn>,
    auto_include_in_watch: bool,
}

impl Kind {
    pub fn new(name: impl Into<String>, api_version: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            api_version: api_version.into(),
            parse_state_fn: None,
            auto_include_in_watch: true,
        }
    }

    pub fn with_parse_state(mut self, f: ParseStateFn) -> Self {
        self.parse_state_fn = Some(f);
        self
    }

    pub fn with_auto_include_in_watch(mut self, v: bool) -> Self {
        self.auto_include_in_watch = v;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn plural(&self) -> String {
        format!("{}s", self.name)
    }

    pub fn is_parseable(&self) -> bool {
        self.parse_state_fn.is_some()
    }

    pub fn is_watchable(&self) -> bool {
        self.auto_include_in_watch
    }

    /// An observed deletion overrides every other rule.
    pub fn parse_state(&self, body: &serde_json::Value, was_deleted: bool) -> State {
        if was_deleted {
            return State::Deleted;
        }
        (self.parse_state_fn.unwrap_or(parse_state_default))(body)
    }

    /// `/(api|apis)/<version>/namespaces/<ns>/<plural>[/<name>[/<suffix>]]`.
    /// The `api` prefix is used when the version looks like `v\d+` (no
    /// group), `apis` otherwise.
    pub fn compose_resource_path(
        &self,
        namespace: &str,
        name: Option<&str>,
        api_version: Option<&str>,
        suffix: Option<&str>,
    ) -> String {
        let api_version = api_version.unwrap_or(&self.api_version);
        let prefix = if is_bare_version(api_version) { "api" } else { "apis" };
        let mut parts = vec![
            prefix.to_string(),
            api_version.to_string(),
            "namespaces".to_string(),
            namespace.to_string(),
            self.plural(),
        ];
        if let Some(name) = name {
            parts.push(name.to_string());
        }
        if let Some(suffix) = suffix {
            parts.push(suffix.to_string());
        }
        format!("/{}", parts.join("/"))
    }
}

fn is_bare_version(api_version: &str) -> bool {
    let mut chars = api_version.chars();
    matches!(chars.next(), Some('v')) && chars.next().is_some_and(|c| c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_digit())
}

impl PartialEq for Kind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.api_version == other.api_version
    }
}
impl Eq for Kind {}

/// An explicit, cloneable registry threaded through the runner and fan-out
/// (SPEC_FULL.md §3: resolves the "global mutable map" design note by
/// making the registry a constructor-injected value rather than process
/// state).
#[derive(Clone, Debug)]
pub struct KindRegistry {
    inner: Arc<RwLock<HashMap<String, Kind>>>,
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// The five built-in kinds from spec.md §3.
    pub fn bootstrap() -> Self {
        let registry = Self::empty();
        registry.register(Kind::new("pod", "v1").with_parse_state(parse_state_pod));
        registry.register(Kind::new("service", "v1"));
        registry.register(Kind::new("event", "v1").with_auto_include_in_watch(false));
        registry.register(Kind::new("job", "batch/v1").with_parse_state(parse_state_job));
        registry.register(Kind::new("deployment", "apps/v1"));
        registry
    }

    pub fn register(&self, kind: Kind) {
        self.inner.write().expect("kind registry lock poisoned").insert(kind.name().to_string(), kind);
    }

    pub fn get(&self, name: &str) -> Option<Kind> {
        self.inner.read().expect("kind registry lock poisoned").get(&name.to_lowercase()).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.read().expect("kind registry lock poisoned").contains_key(&name.to_lowercase())
    }

    pub fn all(&self) -> Vec<Kind> {
        self.inner.read().expect("kind registry lock poisoned").values().cloned().collect()
    }

    pub fn parseable(&self) -> Vec<Kind> {
        self.all().into_iter().filter(Kind::is_parseable).collect()
    }

    pub fn watchable(&self) -> Vec<Kind> {
        self.all().into_iter().filter(Kind::is_watchable).collect()
    }

    /// spec.md §4.C — creating a kind from an existing name inherits
    /// missing fields (api_version, parse_state) from the registered entry.
    pub fn create_from_existing(
        &self,
        name: &str,
        api_version: Option<&str>,
        parse_state_fn: Option<ParseStateFn>,
    ) -> Kind {
        let existing = self.get(name);
        match existing {
            None => {
                let mut k = Kind::new(name, api_version.unwrap_or_default());
                if let Some(f) = parse_state_fn {
                    k = k.with_parse_state(f);
                }
                k
            }
            Some(existing) => {
                let mut k = Kind::new(name, api_version.unwrap_or(existing.api_version()))
                    .with_auto_include_in_watch(existing.auto_include_in_watch);
                if let Some(f) = parse_state_fn.or(existing.parse_state_fn) {
                    k = k.with_parse_state(f);
                }
                k
            }
        }
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::bootstrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefix_api_for_bare_version() {
        let k = Kind::new("pod", "v1");
        assert_eq!(k.compose_resource_path("default", None, None, None), "/api/v1/namespaces/default/pods");
    }

    #[test]
    fn path_prefix_apis_for_grouped_version() {
        let k = Kind::new("job", "batch/v1");
        assert_eq!(
            k.compose_resource_path("default", Some("my-job"), None, None),
            "/apis/batch/v1/namespaces/default/jobs/my-job"
        );
    }

    #[test]
    fn path_includes_suffix() {
        let k = Kind::new("pod", "v1");
        assert_eq!(
            k.compose_resource_path("default", Some("p"), None, Some("log")),
            "/api/v1/namespaces/default/pods/p/log"
        );
    }

    #[test]
    fn bootstrap_has_builtins() {
        let r = KindRegistry::bootstrap();
        assert!(r.has("pod"));
        assert!(r.get("pod").unwrap().is_parseable());
        assert!(!r.get("event").unwrap().is_watchable());
        assert_eq!(r.watchable().len(), 4); // all but Event
        assert_eq!(r.parseable().len(), 2); // Pod, Job
    }

    #[test]
    fn create_from_existing_inherits_missing_fields() {
        let r = KindRegistry::bootstrap();
        let k = r.create_from_existing("job", None, None);
        assert_eq!(k.api_version(), "batch/v1");
        assert!(k.is_parseable());
    }
}
