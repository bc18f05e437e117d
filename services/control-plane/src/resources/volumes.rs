use herd_model::{ActionStatus, Volume};

use super::{remove_record, retries};
use crate::actions::{Action, ActionResult, BackgroundAction};
use crate::state::ControlPlane;

/// Block-storage volumes.
#[derive(Clone)]
pub struct Volumes {
    plane: ControlPlane,
}

impl Volumes {
    pub(crate) fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    /// Persist `volume` and provision it inline.
    pub async fn create(&self, volume: Volume) -> ActionResult<()> {
        self.plane.store().create(&volume).await?;
        self.provision(&volume).now().await
    }

    pub fn provision(&self, volume: &Volume) -> Action<Volume> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            volume.clone(),
            ActionStatus::new("provisioning", retries::VOLUME_PROVISION),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let volume = ctx.resource().await;
                    let provider = plane.provider_for_kube_id(&volume.kube_id).await?;
                    provider.create_volume(&ctx).await
                }
            },
        )
    }

    /// Change the volume's size, resizing the provider disk in the background
    /// when it differs from the stored size.
    pub async fn update_size(&self, volume: &Volume, size_gib: u32) -> ActionResult<Option<BackgroundAction>> {
        let stored: Volume = self.plane.store().get(&volume.id).await?;
        if stored.size_gib == size_gib {
            return Ok(None);
        }
        Ok(Some(self.resize(&stored, size_gib).spawn().await?))
    }

    pub fn resize(&self, volume: &Volume, size_gib: u32) -> Action<Volume> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            volume.clone(),
            ActionStatus::new("resizing", retries::VOLUME_RESIZE),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let volume = ctx.resource().await;
                    let provider = plane.provider_for_kube_id(&volume.kube_id).await?;
                    provider.resize_volume(&ctx, size_gib).await
                }
            },
        )
    }

    pub fn delete(&self, volume: &Volume) -> Action<Volume> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            volume.clone(),
            ActionStatus::new("deleting", retries::VOLUME_DELETE),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let volume = ctx.resource().await;
                    let provider = plane.provider_for_kube_id(&volume.kube_id).await?;
                    provider.delete_volume(&ctx).await?;
                    remove_record::<Volume>(plane.store(), &volume.id).await
                }
            },
        )
    }
}
