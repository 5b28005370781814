use crate::error::CoreError;
use serde_json::Value;

/// The label applied to every nested `metadata` block of a prepared
/// manifest, scoping all cluster operations to a single run (spec.md
/// §3/§6, GLOSSARY "Instance ID label").
pub const INSTANCE_ID_LABEL: &str = "kubernetes-job-runner-instance-id";

/// `name = join("-", filter(nonEmpty, [prefix, original, postfix]))` —
/// spec.md §3/§8. Errors if every segment is empty.
pub fn compose_name(prefix: Option<&str>, original: Option<&str>, postfix: Option<&str>) -> Result<String, CoreError> {
    let parts: Vec<&str> = [prefix, original, postfix]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return Err(CoreError::InvalidManifest("composed name has no non-empty segments".into()));
    }
    Ok(parts.join("-"))
}

/// Recursively stamps `label_key=label_value` onto every nested `metadata`
/// block that sits beside a `spec` or `metadata` key (spec.md §3's
/// "Manifest bundle" invariant), mirroring
/// `JobRunner.update_metadata_labels`: every dict-valued field is walked,
/// and at each level, if the dict itself carries a `spec` or `metadata`
/// key, its `metadata.labels` map gets the label merged in.
pub fn stamp_instance_label(body: &mut Value, label_key: &str, label_value: &str) {
    let Value::Object(map) = body else { return };

    if map.contains_key("spec") || map.contains_key("metadata") {
        let metadata = map.entry("metadata").or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(meta) = metadata {
            let labels = meta.entry("labels").or_insert_with(|| Value::Object(Default::default()));
            if let Value::Object(labels) = labels {
                labels.insert(label_key.to_string(), Value::String(label_value.to_string()));
            }
        }
    }

    let children: Vec<Value> = map.values().cloned().collect();
    let keys: Vec<String> = map.keys().cloned().collect();
    for (key, mut child) in keys.into_iter().zip(children) {
        if child.is_object() {
            stamp_instance_label(&mut child, label_key, label_value);
            map.insert(key, child);
        }
    }
}

/// spec.md §3: every nested metadata block adjacent to a `spec` or
/// `metadata` carries the instance-ID label equal to `expected`.
pub fn every_nested_metadata_has_label(body: &Value, label_key: &str, expected: &str) -> bool {
    let Value::Object(map) = body else { return true };
    if map.contains_key("spec") || map.contains_key("metadata") {
        let has_label = map
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.get(label_key))
            .and_then(|v| v.as_str())
            == Some(expected);
        if !has_label {
            return false;
        }
    }
    map.values().all(|child| every_nested_metadata_has_label(child, label_key, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compose_name_drops_empty_segments() {
        assert_eq!(compose_name(Some(""), Some("job"), Some("")).unwrap(), "job");
        assert_eq!(compose_name(Some("pre"), Some("job"), Some("post")).unwrap(), "pre-job-post");
        assert!(compose_name(Some(""), Some(""), Some("")).is_err());
    }

    #[test]
    fn stamp_applies_recursively_and_is_idempotent() {
        let mut body = json!({
            "kind": "Job",
            "spec": {
                "template": {
                    "metadata": {"labels": {"app": "x"}},
                    "spec": {"containers": []}
                }
            }
        });
        stamp_instance_label(&mut body, INSTANCE_ID_LABEL, "abc-123");
        assert!(every_nested_metadata_has_label(&body, INSTANCE_ID_LABEL, "abc-123"));

        // idempotent: stamping twice doesn't change the outcome
        stamp_instance_label(&mut body, INSTANCE_ID_LABEL, "abc-123");
        assert!(every_nested_metadata_has_label(&body, INSTANCE_ID_LABEL, "abc-123"));

        let template_labels = &body["spec"]["template"]["metadata"]["labels"];
        assert_eq!(template_labels["app"], "x");
        assert_eq!(template_labels[INSTANCE_ID_LABEL], "abc-123");
    }
}
