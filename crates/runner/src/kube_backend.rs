use crate::backend::ClusterBackend;
use crate::error::RunnerError;
use async_trait::async_trait;
use futures::StreamExt;
use jobop_core::{Kind, KindRegistry};
use jobop_stream::{BytesStream, OpenFuture, ResponseFactory, StreamError};
use jobop_watch::{PodLogOpener, WatchStreamOpener};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::discovery::Discovery;
use kube::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Appends `?a=b&c=d` query params, percent-encoding values with the same
/// conservative rule the Python source's `urlencode` applies — escape
/// everything but unreserved characters.
fn append_query(path: &str, params: &[(&str, Option<&str>)]) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        if let Some(value) = value {
            pairs.push(format!("{key}={}", urlencode(value)));
        }
    }
    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", pairs.join("&"))
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn to_bytes_stream(client: Client, uri: String) -> OpenFuture {
    Box::pin(async move {
        let request = http::Request::builder()
            .uri(uri)
            .body(Vec::new())
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        let stream = client
            .request_text_stream(request)
            .await
            .map_err(map_kube_error)?;
        let stream = stream.map(|chunk| chunk.map_err(map_kube_error));
        Ok(Box::pin(stream) as BytesStream)
    })
}

fn map_kube_error(err: kube::Error) -> StreamError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => StreamError::NotFound,
        kube::Error::Api(resp) if resp.code == 400 => StreamError::BadRequest,
        _ => StreamError::Transport(err.to_string()),
    }
}

/// Opens the chunked `?watch=true` response for one `(namespace, kind)` pair
/// against a real cluster (spec.md §4.B/§4.F).
pub struct KubeWatchOpener {
    client: Client,
}

impl KubeWatchOpener {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl WatchStreamOpener for KubeWatchOpener {
    fn open_watch(
        &self,
        namespace: &str,
        kind: &Kind,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Arc<dyn ResponseFactory> {
        let client = self.client.clone();
        let path = kind.compose_resource_path(namespace, None, None, None);
        let uri = append_query(
            &path,
            &[
                ("watch", Some("true")),
                ("labelSelector", label_selector),
                ("fieldSelector", field_selector),
            ],
        );
        Arc::new(move || to_bytes_stream(client.clone(), uri.clone()))
    }
}

/// Opens a Pod's `/log` subresource, following (`follow=true`) when the pod
/// is still `Running` or performing a one-shot read otherwise
/// (spec.md §4.E).
pub struct KubeLogOpener {
    client: Client,
    pod_kind: Kind,
}

impl KubeLogOpener {
    pub fn new(client: Client, pod_kind: Kind) -> Self {
        Self { client, pod_kind }
    }
}

impl PodLogOpener for KubeLogOpener {
    fn open_pod_log(&self, namespace: &str, pod_name: &str, follow: bool) -> Arc<dyn ResponseFactory> {
        let client = self.client.clone();
        let path = self.pod_kind.compose_resource_path(namespace, Some(pod_name), None, Some("log"));
        let uri = append_query(&path, &[("follow", Some(if follow { "true" } else { "false" })), ("timestamps", Some("false"))]);
        Arc::new(move || to_bytes_stream(client.clone(), uri.clone()))
    }
}

/// Splits an `apiVersion` like `batch/v1` into `(group, version)`, `v1` into
/// `("", "v1")` (spec.md §3).
fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Resolves every registered [`Kind`] against the cluster's served API
/// resources (spec.md §4.G, mirroring `GetAPIVersions.get_existing_api_kinds`).
async fn discover_api_resources(client: &Client, registry: &KindRegistry) -> Result<Vec<(String, ApiResource)>, RunnerError> {
    let discovery = Discovery::new(client.clone()).run().await?;
    let mut found = Vec::new();
    for kind in registry.all() {
        let (group, version) = split_api_version(kind.api_version());
        for group_entry in discovery.groups() {
            for (ar, _caps) in group_entry.recommended_resources() {
                if ar.group == group && ar.version == version && ar.kind.eq_ignore_ascii_case(kind.name()) {
                    found.push((kind.name().to_string(), ar.clone()));
                }
            }
        }
    }
    Ok(found)
}

/// Resolves a single [`Kind`] against the cluster's served API resources,
/// independent of any [`KindRegistry`] — used by [`KubeBackend::create`]/
/// `delete`, which operate on one kind at a time.
async fn find_api_resource(client: &Client, kind: &Kind) -> Result<ApiResource, RunnerError> {
    let discovery = Discovery::new(client.clone()).run().await?;
    let (group, version) = split_api_version(kind.api_version());
    discovery
        .groups()
        .flat_map(|g| g.recommended_resources())
        .find(|(ar, _caps)| ar.group == group && ar.version == version && ar.kind.eq_ignore_ascii_case(kind.name()))
        .map(|(ar, _caps)| ar)
        .ok_or_else(|| RunnerError::KindUnavailable(kind.name().to_string()))
}

/// Real-cluster [`ClusterBackend`], backed by `kube::discovery::Discovery`
/// and `kube::Api<DynamicObject>` — the same discovery and dynamic-object
/// pattern `kubehub::discover`/`kubehub::find_api_resource` used, generalized
/// from a typed `Api<K>` to the dynamic one a runtime-resolved `Kind` needs.
pub struct KubeBackend {
    client: Client,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn discover(&self, registry: &KindRegistry) -> Result<HashSet<String>, RunnerError> {
        Ok(discover_api_resources(&self.client, registry).await?.into_iter().map(|(name, _)| name).collect())
    }

    async fn create(&self, kind: &Kind, namespace: &str, body: Value) -> Result<(), RunnerError> {
        let ar = find_api_resource(&self.client, kind).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let obj: DynamicObject = serde_json::from_value(body).map_err(|e| RunnerError::Validation(e.to_string()))?;
        api.create(&PostParams::default(), &obj).await?;
        Ok(())
    }

    async fn delete(&self, kind: &Kind, namespace: &str, name: &str) -> Result<(), RunnerError> {
        let ar = find_api_resource(&self.client, kind).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: &Kind, namespace: &str, label_selector: &str) -> Result<Vec<Value>, RunnerError> {
        let ar = find_api_resource(&self.client, kind).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let objects = api.list(&ListParams::default().labels(label_selector)).await?;
        objects.items.into_iter().map(|obj| serde_json::to_value(obj).map_err(|e| RunnerError::Validation(e.to_string()))).collect()
    }
}
