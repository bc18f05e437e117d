use herd_model::{ActionStatus, Kube, Node};
use tracing::{info, warn};

use super::{remove_record, retries};
use crate::actions::{Action, ActionResult, BackgroundAction};
use crate::inspector::{InspectorError, PodQuery};
use crate::state::ControlPlane;
use crate::store::StoreResult;

/// Compute nodes.
#[derive(Clone)]
pub struct Nodes {
    plane: ControlPlane,
}

impl Nodes {
    pub(crate) fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    /// Persist `node` and start provisioning it in the background.
    pub async fn create(&self, node: Node) -> ActionResult<BackgroundAction> {
        self.plane.store().create(&node).await?;
        info!(node_id = %node.id, kube_id = %node.kube_id, size = %node.size, "Creating node");
        self.provision(&node).spawn().await
    }

    pub fn provision(&self, node: &Node) -> Action<Node> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            node.clone(),
            ActionStatus::new("provisioning", retries::NODE_PROVISION),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let node = ctx.resource().await;
                    let provider = plane.provider_for_kube_id(&node.kube_id).await?;
                    provider.create_node(&ctx).await?;
                    ctx.save().await
                }
            },
        )
    }

    /// Tear down the provider instance and remove the record.
    pub fn delete(&self, node: &Node) -> Action<Node> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            node.clone(),
            ActionStatus::new("deleting", retries::NODE_DELETE),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let node = ctx.resource().await;
                    if node.provider_id.is_empty() {
                        warn!(node_id = %node.id, "Deleting node which has no provider_id");
                    } else {
                        let provider = plane.provider_for_kube_id(&node.kube_id).await?;
                        provider.delete_node(&ctx).await?;
                    }
                    remove_record::<Node>(plane.store(), &node.id).await
                }
            },
        )
    }

    pub async fn list_for_kube(&self, kube_id: &str) -> StoreResult<Vec<Node>> {
        self.plane.store().find(|n: &Node| n.kube_id == kube_id).await
    }

    /// Returns true if a running pod on `node` requests a non-zero amount of
    /// CPU or memory.
    pub async fn has_pods_with_reserved_resources(
        &self,
        kube: &Kube,
        node: &Node,
    ) -> Result<bool, InspectorError> {
        if node.name.is_empty() {
            return Ok(false);
        }

        let pods = self
            .plane
            .inspector()
            .list_pods(kube, &PodQuery::running_on(&node.name))
            .await?;
        for pod in &pods {
            if pod.reserves_resources()? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
