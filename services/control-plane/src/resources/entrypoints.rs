use herd_model::{ActionStatus, Entrypoint};

use super::{remove_record, retries};
use crate::actions::{Action, ActionResult, BackgroundAction};
use crate::state::ControlPlane;

/// Provider load balancers.
#[derive(Clone)]
pub struct Entrypoints {
    plane: ControlPlane,
}

impl Entrypoints {
    pub(crate) fn new(plane: ControlPlane) -> Self {
        Self { plane }
    }

    pub async fn create(&self, entrypoint: Entrypoint) -> ActionResult<BackgroundAction> {
        self.plane.store().create(&entrypoint).await?;
        self.provision(&entrypoint).spawn().await
    }

    pub fn provision(&self, entrypoint: &Entrypoint) -> Action<Entrypoint> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            entrypoint.clone(),
            ActionStatus::new("provisioning", retries::ENTRYPOINT_PROVISION),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let entrypoint = ctx.resource().await;
                    let provider = plane.provider_for_kube_id(&entrypoint.kube_id).await?;
                    provider.create_entrypoint(&ctx).await
                }
            },
        )
    }

    pub fn delete(&self, entrypoint: &Entrypoint) -> Action<Entrypoint> {
        let plane = self.plane.clone();
        Action::new(
            self.plane.registry().clone(),
            self.plane.store().clone(),
            entrypoint.clone(),
            ActionStatus::new("deleting", retries::ENTRYPOINT_DELETE),
            move |ctx| {
                let plane = plane.clone();
                async move {
                    let entrypoint = ctx.resource().await;
                    let provider = plane.provider_for_kube_id(&entrypoint.kube_id).await?;
                    provider.delete_entrypoint(&ctx).await?;
                    remove_record::<Entrypoint>(plane.store(), &entrypoint.id).await
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use herd_model::{CloudAccount, Kube};

    use crate::actions::ActionRegistry;
    use crate::config::NodeSizeCatalog;
    use crate::inspector::StaticInspector;
    use crate::provider::{MockProvider, Providers};
    use crate::store::Store;

    #[tokio::test]
    async fn test_create_assigns_address() {
        let plane = ControlPlane::new(
            Store::memory(),
            ActionRegistry::new(),
            Providers::new().with(Arc::new(MockProvider::new("digitalocean"))),
            Arc::new(StaticInspector::new()),
            NodeSizeCatalog::defaults(),
        );
        let account = CloudAccount::new("do", "digitalocean");
        plane.store().create(&account).await.unwrap();
        let kube = Kube::new("prod", &account.id, vec![]);
        plane.store().create(&kube).await.unwrap();

        let entrypoint = Entrypoint::new(&kube.id, "web");
        plane
            .entrypoints()
            .create(entrypoint.clone())
            .await
            .unwrap()
            .join()
            .await
            .unwrap();

        let saved: Entrypoint = plane.store().get(&entrypoint.id).await.unwrap();
        assert_eq!(saved.address.as_deref(), Some("web.lb.digitalocean.example"));
        assert_eq!(saved.provider_id, "digitalocean-lb-000001");
    }
}
