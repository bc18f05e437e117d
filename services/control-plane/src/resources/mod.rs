//! Action-backed operations on persisted resources.
//!
//! Each collection pairs a store record with the provider call that makes
//! it real. Operations that touch the cloud return an [`Action`] so the
//! caller chooses between running it inline (`now`) or in the background
//! (`spawn`); `create` operations persist the record and spawn provisioning.
//!
//! [`Action`]: crate::actions::Action

mod entrypoints;
mod kubes;
mod nodes;
mod volumes;

use herd_model::Resource;

pub use entrypoints::Entrypoints;
pub use kubes::Kubes;
pub use nodes::Nodes;
pub use volumes::Volumes;

use crate::actions::ActionResult;
use crate::store::Store;

/// Retry budgets per operation.
pub mod retries {
    /// Provider-assigned ids are only known after creation, so a retried
    /// create can leak a billable duplicate. Keep the budget at one attempt.
    pub const NODE_PROVISION: u32 = 1;
    pub const NODE_DELETE: u32 = 5;
    pub const KUBE_PROVISION: u32 = 20;
    pub const KUBE_DELETE: u32 = 5;
    pub const VOLUME_PROVISION: u32 = 1;
    pub const VOLUME_RESIZE: u32 = 5;
    pub const VOLUME_DELETE: u32 = 5;
    pub const ENTRYPOINT_PROVISION: u32 = 5;
    pub const ENTRYPOINT_DELETE: u32 = 5;
}

/// Remove a record, treating an already-removed record as success so that
/// retried deletes converge.
async fn remove_record<R: Resource>(store: &Store, id: &str) -> ActionResult<()> {
    match store.delete::<R>(id).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}
