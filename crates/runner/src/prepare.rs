use crate::error::RunnerError;
use jobop_core::{compose_name, stamp_instance_label, KindRegistry, INSTANCE_ID_LABEL};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A per-kind preparation hook, applied after the generic namespace/name/label
/// steps (spec.md §4.G "Apply kind-specific hooks"). A boxed closure rather
/// than a function pointer — unlike [`jobop_core::Kind`]'s `parse_state`,
/// callers need to close over external configuration here
/// (`register_custom_prepare_kind`, SPEC_FULL.md §6).
pub type PrepareHook = Arc<dyn Fn(&mut Value) -> Result<(), RunnerError> + Send + Sync>;

/// The registry of kind-specific preparation hooks (spec.md §4.G, "Other
/// kinds: no hook by default; extensible via registration").
#[derive(Clone)]
pub struct PrepareHooks {
    hooks: Arc<RwLock<HashMap<String, PrepareHook>>>,
}

impl PrepareHooks {
    pub fn empty() -> Self {
        Self { hooks: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// The built-in Job and Pod hooks (spec.md §4.G step 3).
    pub fn bootstrap() -> Self {
        let hooks = Self::empty();
        hooks.register("job", Arc::new(job_hook));
        hooks.register("pod", Arc::new(pod_hook));
        hooks
    }

    pub fn register(&self, kind: &str, hook: PrepareHook) {
        self.hooks.write().expect("prepare hooks lock poisoned").insert(kind.to_lowercase(), hook);
    }

    fn get(&self, kind: &str) -> Option<PrepareHook> {
        self.hooks.read().expect("prepare hooks lock poisoned").get(&kind.to_lowercase()).cloned()
    }
}

impl Default for PrepareHooks {
    fn default() -> Self {
        Self::bootstrap()
    }
}

/// spec.md §4.G step 3, Job: require a template, default `backoffLimit=0`
/// and the template's `restartPolicy="Never"`, and ensure `foregroundDeletion`
/// is present in `metadata.finalizers` exactly once.
fn job_hook(body: &mut Value) -> Result<(), RunnerError> {
    let obj = body.as_object_mut().expect("caller validated body is a map");

    let spec = obj
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| RunnerError::Validation("Job is missing spec".into()))?;

    let template = spec
        .get_mut("template")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| RunnerError::Validation("Job is missing spec.template".into()))?;

    let template_spec = template
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| RunnerError::Validation("Job is missing spec.template.spec".into()))?;

    template_spec.entry("restartPolicy").or_insert_with(|| Value::String("Never".into()));
    spec.entry("backoffLimit").or_insert_with(|| Value::from(0));

    let metadata = obj.entry("metadata").or_insert_with(|| Value::Object(Default::default()));
    let finalizers = metadata
        .as_object_mut()
        .expect("metadata is always an object")
        .entry("finalizers")
        .or_insert_with(|| Value::Array(Vec::new()));
    let finalizers = finalizers.as_array_mut().expect("finalizers is always an array");
    if !finalizers.iter().any(|f| f.as_str() == Some("foregroundDeletion")) {
        finalizers.push(Value::String("foregroundDeletion".into()));
    }

    Ok(())
}

/// spec.md §4.G step 3, Pod: default `spec.restartPolicy="Never"`.
fn pod_hook(body: &mut Value) -> Result<(), RunnerError> {
    let spec = body
        .as_object_mut()
        .expect("caller validated body is a map")
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| RunnerError::Validation("Pod is missing spec".into()))?;
    spec.entry("restartPolicy").or_insert_with(|| Value::String("Never".into()));
    Ok(())
}

/// The raw manifest input a caller may supply (spec.md §4.G step 1).
pub enum ManifestSource {
    /// Multi-document YAML text (`---`-separated).
    Yaml(String),
    Single(Value),
    List(Vec<Value>),
}

/// spec.md §4.G step 1: normalize the input into an ordered list of map
/// manifests. The first element is the primary.
pub fn normalize(source: ManifestSource) -> Result<Vec<Value>, RunnerError> {
    let manifests = match source {
        ManifestSource::Yaml(text) => {
            let mut out = Vec::new();
            for doc in serde_yaml::Deserializer::from_str(&text) {
                let v = serde_yaml::Value::deserialize(doc)?;
                // Empty `---` documents parse as `Null`; skip them.
                if v.is_null() {
                    continue;
                }
                out.push(serde_json::to_value(v).map_err(|e| RunnerError::Validation(e.to_string()))?);
            }
            out
        }
        ManifestSource::Single(v) => vec![v],
        ManifestSource::List(list) => list,
    };

    if manifests.is_empty() {
        return Err(RunnerError::Validation("manifest bundle has no resources".into()));
    }
    if !manifests.iter().all(Value::is_object) {
        return Err(RunnerError::Validation("every manifest element must be a map".into()));
    }
    Ok(manifests)
}

/// spec.md §4.G step 2-3: per-element validation, namespace/name/label
/// stamping, and kind-specific hooks. `postfix` is resolved once per runner
/// instance (constructor time), not recomputed per element.
pub fn prepare_element(
    mut body: Value,
    registry: &KindRegistry,
    hooks: &PrepareHooks,
    default_namespace: &str,
    name_prefix: Option<&str>,
    postfix: Option<&str>,
    instance_id: &str,
) -> Result<Value, RunnerError> {
    let kind_name = body
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| RunnerError::Validation("manifest is missing 'kind'".into()))?
        .to_string();
    if !registry.has(&kind_name) {
        return Err(RunnerError::Validation(format!("unrecognized kubernetes object kind: {kind_name:?}")));
    }
    if body.get("spec").is_none() {
        return Err(RunnerError::Validation(format!("{kind_name}: 'spec' is not defined")));
    }

    let obj = body.as_object_mut().expect("caller validated body is a map");
    let metadata = obj.entry("metadata").or_insert_with(|| Value::Object(Default::default()));
    let metadata = metadata.as_object_mut().expect("metadata is always an object");
    metadata.entry("namespace").or_insert_with(|| Value::String(default_namespace.to_string()));

    let original_name = metadata.get("name").and_then(Value::as_str).map(str::to_string);
    let name = compose_name(name_prefix, original_name.as_deref(), postfix)?;
    metadata.insert("name".to_string(), Value::String(name));

    stamp_instance_label(&mut body, INSTANCE_ID_LABEL, instance_id);

    if let Some(hook) = hooks.get(&kind_name.to_lowercase()) {
        hook(&mut body)?;
    }

    Ok(body)
}
