//! Background scheduling.
//!
//! - [`RecurringWorker`]: runs one [`Service`] immediately and then on a
//!   fixed interval, surviving failed and panicking ticks
//! - [`CapacityService`]: scales every ready kube to fit its unschedulable
//!   pods and retires idle nodes, one [`KubeScaler`] per kube
//! - [`NodeObserver`]: refreshes node readiness from each kube's node list

mod capacity;
mod observer;
mod scaler;
mod worker;

use async_trait::async_trait;

pub use capacity::{CapacityConfig, CapacityError, CapacityService};
pub use observer::{NodeObserver, ObserveOutcome, ObserverError};
pub use scaler::{KubeScaler, ScaleOutcome};
pub use worker::{RecurringWorker, TickOutcome};

/// A job run by a [`RecurringWorker`].
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Run one pass.
    async fn perform(&self) -> anyhow::Result<()>;
}
