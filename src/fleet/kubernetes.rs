//! # Kubernetes Fleet
//!
//! [`FleetApi`] implementation backed by pods in one namespace (or the whole
//! cluster). Pods are listed and watched through `kube_runtime::watcher`,
//! approvals are written as JSON merge patches pinned to the resource version
//! the decision was made on.

use super::{DeletedUnit, FleetApi, FleetError, FleetEvent, FleetWatchStream, WorkerUnit};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use kube_runtime::{watcher, WatchStreamExt};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Field manager recorded on approval patches
const FIELD_MANAGER: &str = "maintenance-admission-controller";

/// Fleet of pods in a single namespace (or all namespaces when empty)
#[derive(Clone)]
pub struct KubeFleet {
    client: Client,
    namespace: String,
}

impl std::fmt::Debug for KubeFleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeFleet")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeFleet {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn watched_pods(&self) -> Api<Pod> {
        if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        }
    }
}

#[async_trait]
impl FleetApi for KubeFleet {
    fn watch(&self) -> FleetWatchStream {
        // default_backoff() keeps the watch alive across disconnects and
        // expired resource versions; errors are still surfaced for logging.
        watcher(self.watched_pods(), watcher::Config::default())
            .default_backoff()
            .map(|event| match event {
                Ok(event) => translate_event(event),
                Err(e) => Err(FleetError::Watch(e.to_string())),
            })
            .boxed()
    }

    async fn update(&self, unit: &WorkerUnit) -> Result<WorkerUnit, FleetError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &unit.namespace);

        let mut metadata = Map::new();
        metadata.insert("annotations".to_string(), json!(unit.annotations));
        if let Some(resource_version) = &unit.resource_version {
            // Makes the patch conditional: the API server answers 409 if the pod moved on
            metadata.insert(
                "resourceVersion".to_string(),
                Value::String(resource_version.clone()),
            );
        }
        let patch = json!({ "metadata": Value::Object(metadata) });

        debug!(unit.key = %unit.key(), "Patching pod annotations");
        let pod = pods
            .patch(
                &unit.name,
                &PatchParams {
                    field_manager: Some(FIELD_MANAGER.to_string()),
                    ..PatchParams::default()
                },
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| classify_api_error(e, unit))?;

        WorkerUnit::try_from(&pod)
    }
}

fn translate_event(event: watcher::Event<Pod>) -> Result<FleetEvent, FleetError> {
    Ok(match event {
        watcher::Event::Init => FleetEvent::Init,
        watcher::Event::InitApply(pod) => FleetEvent::InitApply(WorkerUnit::try_from(&pod)?),
        watcher::Event::InitDone => FleetEvent::InitDone,
        watcher::Event::Apply(pod) => FleetEvent::Apply(WorkerUnit::try_from(&pod)?),
        watcher::Event::Delete(pod) => {
            FleetEvent::Delete(DeletedUnit::Final(WorkerUnit::try_from(&pod)?))
        }
    })
}

fn classify_api_error(error: kube::Error, unit: &WorkerUnit) -> FleetError {
    match error {
        kube::Error::Api(response) if response.code == 409 => FleetError::Conflict { key: unit.key() },
        kube::Error::Api(response) if response.code == 404 => FleetError::NotFound { key: unit.key() },
        kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
            FleetError::Unavailable(response.message)
        }
        other => FleetError::Kube(other),
    }
}

impl TryFrom<&Pod> for WorkerUnit {
    type Error = FleetError;

    fn try_from(pod: &Pod) -> Result<Self, Self::Error> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| FleetError::InvalidObject("pod without metadata.name".to_string()))?;
        let namespace = pod.metadata.namespace.clone().ok_or_else(|| {
            FleetError::InvalidObject(format!("pod {name} without metadata.namespace"))
        })?;

        Ok(WorkerUnit {
            namespace,
            name,
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
            ready: pod_is_ready(pod),
            resource_version: pod.metadata.resource_version.clone(),
        })
    }
}

/// A pod is ready only if its `Ready` condition is explicitly `True`
fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(ready: Option<&str>, annotations: Option<BTreeMap<String, String>>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("worker-0".to_string()),
                namespace: Some("default".to_string()),
                annotations,
                resource_version: Some("42".to_string()),
                ..ObjectMeta::default()
            },
            status: ready.map(|status| PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: status.to_string(),
                    ..PodCondition::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_pod_without_annotations_has_empty_map() {
        let unit = WorkerUnit::try_from(&pod(Some("True"), None)).unwrap();
        assert!(unit.annotations.is_empty());
        assert!(unit.ready);
        assert_eq!(unit.key(), "default/worker-0");
        assert_eq!(unit.resource_version.as_deref(), Some("42"));
    }

    #[test]
    fn test_pod_readiness() {
        assert!(!WorkerUnit::try_from(&pod(Some("False"), None)).unwrap().ready);
        assert!(!WorkerUnit::try_from(&pod(Some("Unknown"), None)).unwrap().ready);
        assert!(!WorkerUnit::try_from(&pod(None, None)).unwrap().ready);
    }

    #[test]
    fn test_pod_annotations_carried_over() {
        let annotations = BTreeMap::from([("needs-maintenance".to_string(), "true".to_string())]);
        let unit = WorkerUnit::try_from(&pod(Some("True"), Some(annotations))).unwrap();
        assert!(unit.needs_maintenance());
    }

    #[test]
    fn test_pod_without_name_rejected() {
        let mut nameless = pod(Some("True"), None);
        nameless.metadata.name = None;
        assert!(matches!(
            WorkerUnit::try_from(&nameless),
            Err(FleetError::InvalidObject(_))
        ));
    }

    #[test]
    fn test_delete_event_keeps_final_state() {
        let event = translate_event(watcher::Event::Delete(pod(Some("True"), None))).unwrap();
        match event {
            FleetEvent::Delete(deleted) => assert_eq!(deleted.key(), "default/worker-0"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
