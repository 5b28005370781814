use crate::error::CoreError;
use crate::kinds::{Kind, KindRegistry};
use crate::state::State;
use serde_json::Value;
use std::fmt;

/// A thin lens over a manifest (spec.md §3/§4.D). Mutations write through to
/// the underlying `serde_json::Value` — this type never clones the body.
pub struct Descriptor<'a> {
    body: &'a mut Value,
    kind: Option<Kind>,
}

impl<'a> Descriptor<'a> {
    /// Resolves `kind` from the body's `kind` + `apiVersion` against
    /// `registry`, materializing `metadata` if `assert_metadata` is set.
    pub fn new(body: &'a mut Value, registry: &KindRegistry, assert_metadata: bool) -> Result<Self, CoreError> {
        if !body.is_object() {
            return Err(CoreError::InvalidManifest("manifest body must be a map".into()));
        }
        let kind_name = body.get("kind").and_then(|v| v.as_str()).map(|s| s.to_string());
        let api_version = body.get("apiVersion").and_then(|v| v.as_str()).map(|s| s.to_string());
        let kind = kind_name.map(|name| registry.create_from_existing(&name, api_version.as_deref(), None));

        if assert_metadata && body.get("metadata").is_none() {
            body.as_object_mut()
                .expect("checked above")
                .insert("metadata".into(), Value::Object(Default::default()));
        }

        Ok(Self { body, kind })
    }

    pub fn kind(&self) -> Option<&Kind> {
        self.kind.as_ref()
    }

    pub fn kind_name(&self) -> &str {
        self.kind.as_ref().map(Kind::name).unwrap_or_else(|| {
            self.body.get("kind").and_then(|v| v.as_str()).unwrap_or("{unknown}")
        })
    }

    pub fn api_version(&self) -> Option<&str> {
        self.kind.as_ref().map(Kind::api_version)
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.body.get("metadata")
    }

    pub fn metadata_mut(&mut self) -> &mut Value {
        self.body
            .as_object_mut()
            .expect("constructor validated body is an object")
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()))
    }

    pub fn spec(&self) -> Option<&Value> {
        self.body.get("spec")
    }

    pub fn status(&self) -> Option<&Value> {
        self.body.get("status")
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.get("name")).and_then(|v| v.as_str())
    }

    pub fn set_name(&mut self, name: &str) {
        self.metadata_mut()
            .as_object_mut()
            .expect("metadata is always an object")
            .insert("name".into(), Value::String(name.to_string()));
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().and_then(|m| m.get("namespace")).and_then(|v| v.as_str())
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .as_object_mut()
            .expect("metadata is always an object")
            .insert("namespace".into(), Value::String(namespace.to_string()));
    }

    /// spec.md §4.D — state parsing requires a resolved, parseable kind.
    pub fn state(&self, was_deleted: bool) -> Result<State, CoreError> {
        let kind = self.kind.as_ref().ok_or(CoreError::UnknownKind)?;
        Ok(kind.parse_state(self.body, was_deleted))
    }

    pub fn body(&self) -> &Value {
        self.body
    }

    pub fn body_mut(&mut self) -> &mut Value {
        self.body
    }
}

impl fmt::Display for Descriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.namespace(), self.name()) {
            (Some(ns), name) => {
                write!(f, "{}/{}/{}", ns, self.kind().map(Kind::plural).unwrap_or_else(|| self.kind_name().to_string()), name.unwrap_or(""))
            }
            (None, _) => {
                let av = self.api_version().unwrap_or("{unknown}");
                write!(f, "{}/{}", av, self.kind_name())
            }
        }
    }
}
