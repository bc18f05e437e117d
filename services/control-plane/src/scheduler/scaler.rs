//! Per-kube capacity scaling pass.

use chrono::Utc;
use herd_model::{Kube, Node, NodeSize, Pod, PodDemand};
use herd_reconcile::{already_spinning_up, has_tracked_event, pack, should_retire};
use tokio::time::Instant;
use tracing::{debug, info};

use super::capacity::{CapacityConfig, CapacityError};
use crate::inspector::PodQuery;
use crate::state::ControlPlane;

/// What one scaling pass did to a kube.
#[derive(Debug, Default)]
pub struct ScaleOutcome {
    pub created: Vec<Node>,
    pub retired: Vec<String>,
    /// Sizes not created because a young node of that size exists.
    pub spinning_up: Vec<String>,
}

impl ScaleOutcome {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.retired.is_empty() && self.spinning_up.is_empty()
    }
}

/// Scales one kube: finds unschedulable pods, packs them onto new nodes,
/// and retires idle ones.
pub struct KubeScaler {
    plane: ControlPlane,
    kube: Kube,
    config: CapacityConfig,
    /// Allowed sizes, ascending by cost.
    sizes: Vec<NodeSize>,
}

impl KubeScaler {
    pub async fn new(plane: ControlPlane, kube: Kube, config: CapacityConfig) -> Result<Self, CapacityError> {
        let sizes = plane.node_sizes_for(&kube).await?;
        if sizes.is_empty() {
            return Err(CapacityError::NoNodeSizes { kube_id: kube.id });
        }
        Ok(Self {
            plane,
            kube,
            config,
            sizes,
        })
    }

    pub fn sizes(&self) -> &[NodeSize] {
        &self.sizes
    }

    pub async fn scale(&self) -> Result<ScaleOutcome, CapacityError> {
        let kube_id = self.kube.id.as_str();
        let mut outcome = ScaleOutcome::default();

        let incoming = self.incoming_pods().await?;
        let demand = incoming
            .iter()
            .map(PodDemand::from_pod)
            .collect::<Result<Vec<_>, _>>()?;
        let projected = pack(demand, &self.sizes).map_err(|e| CapacityError::from_packing(e, kube_id))?;

        let nodes = self.plane.nodes();
        let existing = nodes.list_for_kube(kube_id).await?;
        let now = Utc::now();

        for node in &existing {
            let hosts_reserved_pods = nodes.has_pods_with_reserved_resources(&self.kube, node).await?;
            if !should_retire(node, hosts_reserved_pods, now, self.config.min_node_age) {
                continue;
            }

            info!(kube_id, node_id = %node.id, node_name = %node.name, "Terminating idle node");
            match nodes.delete(node).now().await {
                Ok(()) => outcome.retired.push(node.id.clone()),
                Err(e) if e.is_repeated() => {
                    debug!(kube_id, node_id = %node.id, "Node already has an action in flight");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for projected_node in projected {
            let size = projected_node.size.name;
            if already_spinning_up(&existing, &size, now, self.config.min_node_age) {
                info!(kube_id, size = %size, "Already waiting on new node with this size");
                outcome.spinning_up.push(size);
                continue;
            }

            info!(kube_id, size = %size, pods = projected_node.pods.len(), "Creating node");
            let node = Node::new(kube_id, size);
            nodes.create(node.clone()).await?;
            outcome.created.push(node);
        }

        Ok(outcome)
    }

    /// Pending pods reported as unschedulable.
    ///
    /// While any exist, keep rescanning until `wait_before_scale` has
    /// passed, so pods arriving in a burst are packed together.
    async fn incoming_pods(&self) -> Result<Vec<Pod>, CapacityError> {
        let inspector = self.plane.inspector();
        let started = Instant::now();

        loop {
            let pending = inspector.list_pods(&self.kube, &PodQuery::pending()).await?;
            let mut incoming = Vec::new();
            for pod in pending {
                let events = inspector.list_events(&self.kube, &pod.name).await?;
                if has_tracked_event(&events) {
                    incoming.push(pod);
                }
            }

            let elapsed = started.elapsed();
            if incoming.is_empty() || elapsed >= self.config.wait_before_scale {
                return Ok(incoming);
            }

            info!(
                kube_id = %self.kube.id,
                pods = incoming.len(),
                elapsed_secs = elapsed.as_secs_f64(),
                "Waiting to add nodes for unschedulable pods"
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}
