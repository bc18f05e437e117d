//! Shared control plane state.

use std::sync::Arc;

use herd_model::{CloudAccount, Kube, NodeSize, Resource};

use crate::actions::{ActionError, ActionRegistry, ActionResult};
use crate::config::NodeSizeCatalog;
use crate::inspector::WorkloadInspector;
use crate::provider::{Provider, Providers};
use crate::resources::{Entrypoints, Kubes, Nodes, Volumes};
use crate::store::Store;

/// Everything resource operations and background services need.
///
/// Cheap to clone; all clones share the same registry and store.
#[derive(Clone)]
pub struct ControlPlane {
    inner: Arc<ControlPlaneInner>,
}

struct ControlPlaneInner {
    store: Store,
    registry: ActionRegistry,
    providers: Providers,
    inspector: Arc<dyn WorkloadInspector>,
    node_sizes: NodeSizeCatalog,
}

impl ControlPlane {
    pub fn new(
        store: Store,
        registry: ActionRegistry,
        providers: Providers,
        inspector: Arc<dyn WorkloadInspector>,
        node_sizes: NodeSizeCatalog,
    ) -> Self {
        Self {
            inner: Arc::new(ControlPlaneInner {
                store,
                registry,
                providers,
                inspector,
                node_sizes,
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.inner.registry
    }

    pub fn inspector(&self) -> &Arc<dyn WorkloadInspector> {
        &self.inner.inspector
    }

    pub fn node_sizes(&self) -> &NodeSizeCatalog {
        &self.inner.node_sizes
    }

    pub fn nodes(&self) -> Nodes {
        Nodes::new(self.clone())
    }

    pub fn kubes(&self) -> Kubes {
        Kubes::new(self.clone())
    }

    pub fn volumes(&self) -> Volumes {
        Volumes::new(self.clone())
    }

    pub fn entrypoints(&self) -> Entrypoints {
        Entrypoints::new(self.clone())
    }

    pub async fn cloud_account_for(&self, kube: &Kube) -> ActionResult<CloudAccount> {
        Ok(self.store().get(&kube.cloud_account_id).await?)
    }

    /// The driver for the provider hosting `kube`.
    pub async fn provider_for_kube(&self, kube: &Kube) -> ActionResult<Arc<dyn Provider>> {
        let account = self.cloud_account_for(kube).await?;
        self.inner.providers.get(&account.provider).ok_or_else(|| {
            ActionError::provider(format!("no provider registered for {}", account.provider))
        })
    }

    pub async fn provider_for_kube_id(&self, kube_id: &str) -> ActionResult<Arc<dyn Provider>> {
        let kube: Kube = self.store().get(kube_id).await?;
        self.provider_for_kube(&kube).await
    }

    /// Sizes `kube` may scale with: the provider's sizes in cost order,
    /// restricted to the kube's allow-list.
    pub async fn node_sizes_for(&self, kube: &Kube) -> ActionResult<Vec<NodeSize>> {
        let account = self.cloud_account_for(kube).await?;
        Ok(self
            .node_sizes()
            .sizes(&account.provider)
            .iter()
            .filter(|size| kube.node_sizes.iter().any(|allowed| *allowed == size.name))
            .cloned()
            .collect())
    }

    /// Copy the live status of the action registered for `resource` onto it.
    /// Without a registered action the persisted status is left as is.
    pub async fn attach_action_status<R: Resource>(&self, resource: &mut R) -> ActionResult<()> {
        if let Some(status) = self.registry().status_of(resource.id()).await? {
            resource.set_status(Some(status));
        }
        Ok(())
    }
}
