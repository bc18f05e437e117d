use herd_model::{ActionStatus, Entrypoint, Kube, Node, Volume};
use tracing::info;

use super::{remove_record, retries};
use crate::actions::{Action, ActionResult, BackgroundAction};
use crate::state::ControlPlane;
use crate::store::StoreResult;

/// Managed Kubernetes clusters.
#[derive(Clone)]
pub struct Kubes {
    plane: ControlPlane,
}

impl Kubes {
    pub(crate) fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    /// Persist `kube` and start provisioning it in the background.
    pub async fn create(&self, kube: Kube) -> ActionResult<BackgroundAction> {
        self.plane.store().create(&kube).await?;
        info!(kube_id = %kube.id, name = %kube.name, "Creating kube");
        self.provision(&kube).spawn().await
    }

    pub fn provision(&self, kube: &Kube) -> Action<Kube> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            kube.clone(),
            ActionStatus::new("provisioning", retries::KUBE_PROVISION),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let kube = ctx.resource().await;
                    let provider = plane.provider_for_kube(&kube).await?;
                    provider.create_kube(&ctx).await?;
                    ctx.save().await
                }
            },
        )
    }

    /// Delete everything the kube owns, then the kube itself.
    ///
    /// Preempts any in-flight action on the kube, so a stuck provisioning
    /// never blocks teardown.
    pub fn delete(&self, kube: &Kube) -> Action<Kube> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            kube.clone(),
            ActionStatus::new("deleting", retries::KUBE_DELETE),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let kube = ctx.resource().await;
                    let store = plane.store();

                    for entrypoint in store.find(|e: &Entrypoint| e.kube_id == kube.id).await? {
                        plane.entrypoints().delete(&entrypoint).now().await?;
                    }
                    // Nodes go before volumes so no volume is still attached.
                    for node in store.find(|n: &Node| n.kube_id == kube.id).await? {
                        plane.nodes().delete(&node).now().await?;
                    }
                    for volume in store.find(|v: &Volume| v.kube_id == kube.id).await? {
                        plane.volumes().delete(&volume).now().await?;
                    }
                    ctx.checkpoint("kube teardown").await?;

                    let provider = plane.provider_for_kube(&kube).await?;
                    provider.delete_kube(&ctx).await?;
                    remove_record::<Kube>(store, &kube.id).await
                }
            },
        )
        .cancel_existing(true)
    }

    pub async fn list(&self) -> StoreResult<Vec<Kube>> {
        self.plane.store().list().await
    }

    /// Kubes the capacity scheduler may act on.
    pub async fn list_ready(&self) -> StoreResult<Vec<Kube>> {
        self.plane.store().find(|k: &Kube| k.ready).await
    }
}
