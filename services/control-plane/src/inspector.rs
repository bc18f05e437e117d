//! Workload inspector interface and static implementation.
//!
//! The inspector answers questions about what is running inside a kube:
//! pods by phase or node, the scheduling events for a pod, and the names of
//! registered nodes. The capacity scheduler and node retirement read the
//! cluster only through this seam.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use herd_model::{Event, Kube, Pod, PodPhase, UnitError};
use thiserror::Error;
use tokio::sync::RwLock;

/// Inspector errors.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// The kube's API server cannot be reached.
    #[error("kube {kube_id} unavailable: {reason}")]
    Unavailable { kube_id: String, reason: String },

    /// The query was rejected.
    #[error("query failed: {0}")]
    Query(String),

    /// A pod carries an unparsable resource quantity.
    #[error(transparent)]
    InvalidQuantity(#[from] UnitError),
}

/// Pod filter, rendered as a field selector for real clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodQuery {
    pub phase: Option<PodPhase>,
    pub node_name: Option<String>,
}

impl PodQuery {
    pub fn pending() -> Self {
        Self {
            phase: Some(PodPhase::Pending),
            node_name: None,
        }
    }

    pub fn running_on(node_name: impl Into<String>) -> Self {
        Self {
            phase: Some(PodPhase::Running),
            node_name: Some(node_name.into()),
        }
    }

    /// e.g. `status.phase=Running,spec.nodeName=node-1`
    pub fn field_selector(&self) -> String {
        let mut selector = String::new();
        if let Some(phase) = self.phase {
            let _ = write!(selector, "status.phase={:?}", phase);
        }
        if let Some(node_name) = &self.node_name {
            if !selector.is_empty() {
                selector.push(',');
            }
            let _ = write!(selector, "spec.nodeName={}", node_name);
        }
        selector
    }

    pub fn matches(&self, pod: &Pod) -> bool {
        self.phase.map_or(true, |phase| pod.phase == phase)
            && self
                .node_name
                .as_ref()
                .map_or(true, |name| pod.node_name.as_ref() == Some(name))
    }
}

/// Read access to the workload of a kube.
#[async_trait]
pub trait WorkloadInspector: Send + Sync {
    async fn list_pods(&self, kube: &Kube, query: &PodQuery) -> Result<Vec<Pod>, InspectorError>;

    /// Events whose involved object is `involved_object`.
    async fn list_events(&self, kube: &Kube, involved_object: &str) -> Result<Vec<Event>, InspectorError>;

    /// Names of the nodes registered with the kube.
    async fn list_nodes(&self, kube: &Kube) -> Result<Vec<String>, InspectorError>;
}

#[derive(Default)]
struct KubeWorkload {
    pods: Vec<Pod>,
    events: Vec<Event>,
    nodes: Vec<String>,
}

/// Inspector serving fixed, caller-provided workload per kube.
#[derive(Default)]
pub struct StaticInspector {
    kubes: RwLock<HashMap<String, KubeWorkload>>,
    unavailable: RwLock<HashSet<String>>,
}

impl StaticInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_pods(&self, kube_id: &str, pods: Vec<Pod>) {
        self.kubes.write().await.entry(kube_id.to_string()).or_default().pods = pods;
    }

    pub async fn set_events(&self, kube_id: &str, events: Vec<Event>) {
        self.kubes.write().await.entry(kube_id.to_string()).or_default().events = events;
    }

    pub async fn set_nodes(&self, kube_id: &str, nodes: Vec<String>) {
        self.kubes.write().await.entry(kube_id.to_string()).or_default().nodes = nodes;
    }

    /// Make every query against `kube_id` fail.
    pub async fn set_unavailable(&self, kube_id: &str, unavailable: bool) {
        let mut set = self.unavailable.write().await;
        if unavailable {
            set.insert(kube_id.to_string());
        } else {
            set.remove(kube_id);
        }
    }

    async fn check_available(&self, kube: &Kube) -> Result<(), InspectorError> {
        if self.unavailable.read().await.contains(&kube.id) {
            return Err(InspectorError::Unavailable {
                kube_id: kube.id.clone(),
                reason: "marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadInspector for StaticInspector {
    async fn list_pods(&self, kube: &Kube, query: &PodQuery) -> Result<Vec<Pod>, InspectorError> {
        self.check_available(kube).await?;
        let kubes = self.kubes.read().await;
        Ok(kubes
            .get(&kube.id)
            .map(|w| w.pods.iter().filter(|p| query.matches(p)).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_events(&self, kube: &Kube, involved_object: &str) -> Result<Vec<Event>, InspectorError> {
        self.check_available(kube).await?;
        let kubes = self.kubes.read().await;
        Ok(kubes
            .get(&kube.id)
            .map(|w| {
                w.events
                    .iter()
                    .filter(|e| e.involved_object == involved_object)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_nodes(&self, kube: &Kube) -> Result<Vec<String>, InspectorError> {
        self.check_available(kube).await?;
        let kubes = self.kubes.read().await;
        Ok(kubes.get(&kube.id).map(|w| w.nodes.clone()).unwrap_or_default())
    }
}
