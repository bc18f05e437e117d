//! Capacity service: scale every ready kube to its unschedulable demand.

use std::time::Duration;

use async_trait::async_trait;
use herd_model::UnitError;
use herd_reconcile::{
    PackingError, MAX_CLUSTERED_PODS_PER_NODE, MIN_AGE_TO_EXIST, PENDING_POLL_INTERVAL,
    WAIT_BEFORE_SCALE,
};
use thiserror::Error;
use tracing::{error, info, instrument};

use super::scaler::KubeScaler;
use super::Service;
use crate::actions::ActionError;
use crate::inspector::InspectorError;
use crate::state::ControlPlane;
use crate::store::StoreError;

/// Capacity scaling errors.
#[derive(Debug, Error)]
pub enum CapacityError {
    /// Some pod's demand exceeds every allowed size.
    #[error("no node size configured large enough to support {cpu_cores:.1} cores and {ram_gib:.1} GiB RAM")]
    NoNodeSizeLargeEnough { cpu_cores: f64, ram_gib: f64 },

    /// The kube allows no size its provider offers.
    #[error("kube {kube_id} has no usable node sizes")]
    NoNodeSizes { kube_id: String },

    #[error("fetching workload: {0}")]
    Inspector(#[from] InspectorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Units(#[from] UnitError),
}

impl CapacityError {
    pub(crate) fn from_packing(err: PackingError, kube_id: &str) -> Self {
        match err {
            PackingError::NoNodeSizes => Self::NoNodeSizes {
                kube_id: kube_id.to_string(),
            },
            PackingError::NoSizeLargeEnough { cpu_cores, ram_gib } => {
                Self::NoNodeSizeLargeEnough { cpu_cores, ram_gib }
            }
        }
    }
}

/// Capacity service settings.
#[derive(Debug, Clone)]
pub struct CapacityConfig {
    /// Whether the binary runs the capacity service at all.
    pub enabled: bool,
    pub interval: Duration,
    /// How long to keep collecting unschedulable pods before scaling.
    pub wait_before_scale: Duration,
    pub poll_interval: Duration,
    /// Grace period during which a node is neither retired nor duplicated.
    pub min_node_age: Duration,
    /// Carried for operators; packing does not enforce it.
    pub max_clustered_pods_per_node: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            wait_before_scale: WAIT_BEFORE_SCALE,
            poll_interval: PENDING_POLL_INTERVAL,
            min_node_age: MIN_AGE_TO_EXIST,
            max_clustered_pods_per_node: MAX_CLUSTERED_PODS_PER_NODE,
        }
    }
}

/// Scales every ready kube on each pass.
pub struct CapacityService {
    plane: ControlPlane,
    config: CapacityConfig,
}

impl CapacityService {
    pub fn new(plane: ControlPlane, config: CapacityConfig) -> Self {
        Self { plane, config }
    }

    /// Scale each ready kube independently.
    ///
    /// A kube that fails is logged and skipped; the remaining kubes are
    /// still scaled and the first failure is returned at the end.
    #[instrument(skip(self))]
    pub async fn perform(&self) -> Result<(), CapacityError> {
        let kubes = self.plane.kubes().list_ready().await?;
        let mut first_error = None;
        let mut failed = 0usize;

        for kube in kubes {
            let kube_id = kube.id.clone();
            let result = match KubeScaler::new(self.plane.clone(), kube, self.config.clone()).await {
                Ok(scaler) => scaler.scale().await,
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => {
                    if !outcome.is_empty() {
                        info!(
                            kube_id = %kube_id,
                            nodes_created = outcome.created.len(),
                            nodes_retired = outcome.retired.len(),
                            sizes_spinning_up = outcome.spinning_up.len(),
                            "Scaled kube"
                        );
                    }
                }
                Err(e) => {
                    error!(kube_id = %kube_id, error = %e, "Capacity scaling failed for kube");
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => {
                error!(kubes_failed = failed, "Capacity pass finished with failures");
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Service for CapacityService {
    fn name(&self) -> &str {
        "capacity"
    }

    async fn perform(&self) -> anyhow::Result<()> {
        CapacityService::perform(self).await?;
        Ok(())
    }
}
