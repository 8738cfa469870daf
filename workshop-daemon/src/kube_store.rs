//! [`ObjectStore`] backed by the cluster of the current kubeconfig context.
//!
//! Every kind goes through `DynamicObject`; the API resource and its scope
//! are discovered once per group/version/kind and cached.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
    PostParams, WatchEvent as KubeWatchEvent, WatchParams,
};
use kube::discovery::{self, Scope};
use kube::Client;
use tokio::sync::mpsc;

use workshop_converge::store::{log_tail, ClusterEvent, WATCH_BUFFER};
use workshop_converge::{ObjectStore, StoreError, WatchEvent};
use workshop_core::{ManagedResource, ObjectRef};

/// Lines fetched before trimming a pod log down to the byte budget.
const LOG_TAIL_LINES: i64 = 500;

#[derive(Debug, Clone)]
struct Resolved {
    resource: ApiResource,
    namespaced: bool,
}

/// Which write an API error came back from; 409 means different things.
#[derive(Debug, Clone, Copy)]
enum Op {
    Read,
    Create,
    Update,
}

pub struct KubeStore {
    client: Client,
    resolved: Mutex<HashMap<(String, String), Resolved>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Connect with the ambient kubeconfig or in-cluster credentials.
    pub async fn connect() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<Resolved, StoreError> {
        let key = (api_version.to_string(), kind.to_string());
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let (group, version) = split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (resource, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|err| StoreError::Transport(format!("discovery of {api_version} {kind} failed: {err}")))?;
        let resolved = Resolved {
            resource,
            namespaced: caps.scope == Scope::Namespaced,
        };
        if let Ok(mut cache) = self.resolved.lock() {
            cache.insert(key, resolved.clone());
        }
        tracing::debug!(kind, api_version, namespaced = resolved.namespaced, "resolved api resource");
        Ok(resolved)
    }

    fn cached(&self, key: &(String, String)) -> Option<Resolved> {
        self.resolved.lock().ok().and_then(|cache| cache.get(key).cloned())
    }

    async fn api_for(&self, target: &ObjectRef) -> Result<Api<DynamicObject>, StoreError> {
        let resolved = self.resolve(&target.api_version, &target.kind).await?;
        match (&target.namespace, resolved.namespaced) {
            (Some(ns), true) => Ok(Api::namespaced_with(self.client.clone(), ns, &resolved.resource)),
            (_, false) => Ok(Api::all_with(self.client.clone(), &resolved.resource)),
            (None, true) => Err(StoreError::Rejected {
                target: target.clone(),
                reason: format!("{} is namespaced but no namespace was given", target.kind),
            }),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, target: &ObjectRef) -> Result<ManagedResource, StoreError> {
        let api = self.api_for(target).await?;
        let obj = api
            .get(&target.name)
            .await
            .map_err(|err| map_kube_error(err, target, Op::Read))?;
        from_dynamic(&obj, target)
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<ManagedResource>, StoreError> {
        let resolved = self.resolve(api_version, kind).await?;
        let api: Api<DynamicObject> = match namespace {
            Some(ns) if resolved.namespaced => Api::namespaced_with(self.client.clone(), ns, &resolved.resource),
            _ => Api::all_with(self.client.clone(), &resolved.resource),
        };
        let listed = ObjectRef {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: String::new(),
            namespace: namespace.map(str::to_string),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|err| map_kube_error(err, &listed, Op::Read))?;
        list.items.iter().map(|obj| from_dynamic(obj, &listed)).collect()
    }

    async fn create(&self, object: ManagedResource) -> Result<ManagedResource, StoreError> {
        let target = object.object_ref();
        let api = self.api_for(&target).await?;
        let created = api
            .create(&PostParams::default(), &to_dynamic(&object)?)
            .await
            .map_err(|err| map_kube_error(err, &target, Op::Create))?;
        from_dynamic(&created, &target)
    }

    async fn update(&self, object: ManagedResource) -> Result<ManagedResource, StoreError> {
        let target = object.object_ref();
        let api = self.api_for(&target).await?;
        let replaced = api
            .replace(&target.name, &PostParams::default(), &to_dynamic(&object)?)
            .await
            .map_err(|err| map_kube_error(err, &target, Op::Update))?;
        from_dynamic(&replaced, &target)
    }

    async fn update_status(&self, object: ManagedResource) -> Result<ManagedResource, StoreError> {
        let target = object.object_ref();
        let api = self.api_for(&target).await?;
        let body = serde_json::to_vec(&object).map_err(|err| StoreError::Transport(err.to_string()))?;
        let replaced = api
            .replace_status(&target.name, &PostParams::default(), body)
            .await
            .map_err(|err| map_kube_error(err, &target, Op::Update))?;
        from_dynamic(&replaced, &target)
    }

    async fn delete(&self, target: &ObjectRef) -> Result<(), StoreError> {
        let api = self.api_for(target).await?;
        api.delete(&target.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|err| map_kube_error(err, target, Op::Read))
    }

    async fn watch(&self, target: &ObjectRef) -> Result<mpsc::Receiver<WatchEvent>, StoreError> {
        let api = self.api_for(target).await?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        // Current object first, then changes after its resourceVersion.
        let version = match api.get_opt(&target.name).await {
            Ok(Some(obj)) => {
                let version = obj.metadata.resource_version.clone().unwrap_or_else(|| "0".to_string());
                let _ = tx.send(WatchEvent::Added(from_dynamic(&obj, target)?)).await;
                version
            }
            Ok(None) => "0".to_string(),
            Err(err) => return Err(map_kube_error(err, target, Op::Read)),
        };

        let params = WatchParams::default().fields(&format!("metadata.name={}", target.name));
        let target = target.clone();
        tokio::spawn(async move {
            let stream = match api.watch(&params, &version).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(WatchEvent::Error(err.to_string())).await;
                    return;
                }
            };
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(KubeWatchEvent::Added(obj)) => from_dynamic(&obj, &target).map(WatchEvent::Added),
                    Ok(KubeWatchEvent::Modified(obj)) => from_dynamic(&obj, &target).map(WatchEvent::Modified),
                    Ok(KubeWatchEvent::Deleted(_)) => Ok(WatchEvent::Deleted(target.clone())),
                    Ok(KubeWatchEvent::Bookmark(_)) => continue,
                    Ok(KubeWatchEvent::Error(status)) => Ok(WatchEvent::Error(status.message)),
                    Err(err) => Ok(WatchEvent::Error(err.to_string())),
                };
                let event = event.unwrap_or_else(|err| WatchEvent::Error(err.to_string()));
                let terminal = matches!(event, WatchEvent::Error(_));
                if tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn recent_events(&self, target: &ObjectRef) -> Result<Vec<ClusterEvent>, StoreError> {
        let api: Api<Event> = match &target.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let fields = format!(
            "involvedObject.kind={},involvedObject.name={}",
            target.kind, target.name
        );
        let list = api
            .list(&ListParams::default().fields(&fields))
            .await
            .map_err(|err| map_kube_error(err, target, Op::Read))?;
        Ok(list
            .items
            .into_iter()
            .map(|event| ClusterEvent {
                event_type: event.type_.unwrap_or_default(),
                reason: event.reason.unwrap_or_default(),
                message: event.message.unwrap_or_default(),
            })
            .collect())
    }

    async fn pod_log_tail(&self, target: &ObjectRef, max_bytes: usize) -> Result<Option<String>, StoreError> {
        let Some(namespace) = target.namespace.as_deref() else {
            return Ok(None);
        };
        let workload = self.get(target).await?;
        let Some(selector) = match_labels_selector(&workload) else {
            return Ok(None);
        };

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|err| map_kube_error(err, target, Op::Read))?;
        let Some(pod) = list.items.into_iter().find_map(|p| p.metadata.name) else {
            return Ok(None);
        };

        match pods.logs(&pod, &tail_log_params()).await {
            Ok(log) => Ok(Some(log_tail(&log, max_bytes).to_string())),
            Err(kube::Error::Api(ae)) if ae.code == 400 || ae.code == 404 => Ok(None),
            Err(err) => Err(map_kube_error(err, target, Op::Read)),
        }
    }
}

/// `limit_bytes` would cut from the start of the log, so the request is
/// bounded by lines and the byte budget is applied to the end afterwards.
fn tail_log_params() -> LogParams {
    LogParams {
        tail_lines: Some(LOG_TAIL_LINES),
        ..LogParams::default()
    }
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// `spec.selector.matchLabels` as a label selector string.
fn match_labels_selector(workload: &ManagedResource) -> Option<String> {
    let labels = workload.pointer("/spec/selector/matchLabels")?.as_object()?;
    let pairs: Vec<String> = labels
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}={v}")))
        .collect();
    (!pairs.is_empty()).then(|| pairs.join(","))
}

fn map_kube_error(err: kube::Error, target: &ObjectRef, op: Op) -> StoreError {
    match err {
        kube::Error::Api(ae) => match (ae.code, op) {
            (404, _) => StoreError::NotFound(target.clone()),
            (409, Op::Create) => StoreError::AlreadyExists(target.clone()),
            (409, _) => StoreError::Conflict(target.clone()),
            (400 | 403 | 422, _) => StoreError::Rejected {
                target: target.clone(),
                reason: ae.message,
            },
            (code, _) => StoreError::Transport(format!("{target}: HTTP {code}: {}", ae.message)),
        },
        other => StoreError::Transport(format!("{target}: {other}")),
    }
}

fn to_dynamic(object: &ManagedResource) -> Result<DynamicObject, StoreError> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|err| StoreError::Transport(format!("encoding {}: {err}", object.object_ref())))
}

fn from_dynamic(object: &DynamicObject, target: &ObjectRef) -> Result<ManagedResource, StoreError> {
    let mut resource: ManagedResource = serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|err| StoreError::Transport(format!("decoding {target}: {err}")))?;
    // List items can come back without type meta.
    if resource.api_version.is_empty() {
        resource.api_version = target.api_version.clone();
    }
    if resource.kind.is_empty() {
        resource.kind = target.kind.clone();
    }
    Ok(resource)
}
