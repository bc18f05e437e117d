//! Node observer: keeps node readiness in line with what each kube reports.

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::Service;
use crate::actions::ActionError;
use crate::state::ControlPlane;
use crate::store::StoreError;

/// Node observer errors.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Counts from one observer pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOutcome {
    pub became_ready: usize,
    pub became_unready: usize,
}

/// Marks a provisioned node ready while its kube lists it, and not ready
/// once the kube stops listing it.
pub struct NodeObserver {
    plane: ControlPlane,
}

impl NodeObserver {
    pub fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    /// Refresh the nodes of every ready kube.
    ///
    /// A kube that cannot be queried is skipped. Nodes with an action in
    /// flight are left to that action.
    #[instrument(skip(self))]
    pub async fn perform(&self) -> Result<ObserveOutcome, ObserverError> {
        let mut outcome = ObserveOutcome::default();
        let nodes = self.plane.nodes();

        for kube in self.plane.kubes().list_ready().await? {
            let registered: HashSet<String> = match self.plane.inspector().list_nodes(&kube).await {
                Ok(names) => names.into_iter().collect(),
                Err(e) => {
                    warn!(kube_id = %kube.id, error = %e, "Could not list nodes of kube");
                    continue;
                }
            };

            for mut node in nodes.list_for_kube(&kube.id).await? {
                if node.provider_id.is_empty() || node.name.is_empty() {
                    continue;
                }
                let ready = registered.contains(&node.name);
                if node.ready == ready {
                    continue;
                }
                if self.plane.registry().fetch(&node.id).await?.is_some() {
                    debug!(node_id = %node.id, "Node has an action in flight, not observing");
                    continue;
                }

                node.ready = ready;
                match self.plane.store().save(&node).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                }

                if ready {
                    info!(kube_id = %kube.id, node_id = %node.id, node_name = %node.name, "Node is ready");
                    outcome.became_ready += 1;
                } else {
                    warn!(kube_id = %kube.id, node_id = %node.id, node_name = %node.name, "Node no longer registered with kube");
                    outcome.became_unready += 1;
                }
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl Service for NodeObserver {
    fn name(&self) -> &str {
        "node_observer"
    }

    async fn perform(&self) -> anyhow::Result<()> {
        NodeObserver::perform(self).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use herd_model::{ActionStatus, CloudAccount, Kube, Node};

    use crate::actions::{AcquirePolicy, ActionEntry, ActionRegistry};
    use crate::config::NodeSizeCatalog;
    use crate::inspector::StaticInspector;
    use crate::provider::{MockProvider, Providers};
    use crate::store::Store;

    async fn fixture() -> (ControlPlane, Arc<StaticInspector>, Kube) {
        let inspector = Arc::new(StaticInspector::new());
        let plane = ControlPlane::new(
            Store::memory(),
            ActionRegistry::new(),
            Providers::new().with(Arc::new(MockProvider::new("digitalocean"))),
            inspector.clone(),
            NodeSizeCatalog::defaults(),
        );
        let account = CloudAccount::new("do", "digitalocean");
        plane.store().create(&account).await.unwrap();
        let mut kube = Kube::new("prod", &account.id, vec!["2gb".to_string()]);
        kube.ready = true;
        plane.store().create(&kube).await.unwrap();
        (plane, inspector, kube)
    }

    async fn provisioned(plane: &ControlPlane, kube: &Kube, name: &str, ready: bool) -> Node {
        let mut node = Node::new(&kube.id, "2gb");
        node.name = name.to_string();
        node.provider_id = format!("droplet-{name}");
        node.ready = ready;
        plane.store().create(&node).await.unwrap();
        node
    }

    async fn reload(plane: &ControlPlane, node: &Node) -> Node {
        plane.store().get(&node.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_readiness_follows_kube_registration() {
        let (plane, inspector, kube) = fixture().await;
        let joining = provisioned(&plane, &kube, "node-1", false).await;
        let gone = provisioned(&plane, &kube, "node-2", true).await;
        let unnamed = Node::new(&kube.id, "2gb");
        plane.store().create(&unnamed).await.unwrap();
        inspector.set_nodes(&kube.id, vec!["node-1".to_string()]).await;

        let observer = NodeObserver::new(plane.clone());
        let outcome = observer.perform().await.unwrap();

        assert_eq!(
            outcome,
            ObserveOutcome {
                became_ready: 1,
                became_unready: 1
            }
        );
        assert!(reload(&plane, &joining).await.ready);
        assert!(!reload(&plane, &gone).await.ready);
        assert!(!reload(&plane, &unnamed).await.ready);

        assert_eq!(observer.perform().await.unwrap(), ObserveOutcome::default());
    }

    #[tokio::test]
    async fn test_unreachable_kube_is_skipped() {
        let (plane, inspector, kube) = fixture().await;
        let node = provisioned(&plane, &kube, "node-1", true).await;
        inspector.set_unavailable(&kube.id, true).await;

        let outcome = NodeObserver::new(plane.clone()).perform().await.unwrap();

        assert_eq!(outcome, ObserveOutcome::default());
        assert!(reload(&plane, &node).await.ready);
    }

    #[tokio::test]
    async fn test_node_with_action_in_flight_is_left_alone() {
        let (plane, inspector, kube) = fixture().await;
        let node = provisioned(&plane, &kube, "node-1", false).await;
        inspector.set_nodes(&kube.id, vec!["node-1".to_string()]).await;

        let entry = Arc::new(ActionEntry::new("node", &node.id, ActionStatus::new("deleting", 5)));
        plane
            .registry()
            .acquire(entry, AcquirePolicy::Now { cancel_existing: false })
            .await
            .unwrap();

        let outcome = NodeObserver::new(plane.clone()).perform().await.unwrap();

        assert_eq!(outcome, ObserveOutcome::default());
        assert!(!reload(&plane, &node).await.ready);
    }
}
