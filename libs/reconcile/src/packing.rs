//! Bin-packing of pending pod demand onto projected nodes.

use herd_model::{NodeSize, PodDemand};
use thiserror::Error;
use tracing::debug;

use crate::MAX_DISKS_PER_NODE;

/// Packing failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PackingError {
    /// No node sizes were provided.
    #[error("no node sizes configured")]
    NoNodeSizes,

    /// A projected node outgrew every configured size.
    #[error("no node size configured large enough to support {cpu_cores:.1} cores and {ram_gib:.1}GiB RAM")]
    NoSizeLargeEnough { cpu_cores: f64, ram_gib: f64 },
}

/// A node that does not exist yet, used only within one packing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedNode {
    pub committed: bool,
    pub size: NodeSize,
    pub pods: Vec<PodDemand>,
}

impl ProjectedNode {
    fn seed(size: &NodeSize, pod: PodDemand) -> Self {
        Self {
            committed: false,
            size: size.clone(),
            pods: vec![pod],
        }
    }

    pub fn used_cpu(&self) -> f64 {
        self.pods.iter().map(|p| p.cpu_cores).sum()
    }

    pub fn used_ram(&self) -> f64 {
        self.pods.iter().map(|p| p.ram_gib).sum()
    }

    pub fn used_volumes(&self) -> usize {
        self.pods.iter().map(|p| p.volumes).sum()
    }

    /// Returns true if `other`'s pods fit alongside ours within our current
    /// size and the per-node disk limit.
    pub fn can_merge_with(&self, other: &ProjectedNode) -> bool {
        let cpu = self.used_cpu() + other.used_cpu();
        let ram = self.used_ram() + other.used_ram();
        let volumes = self.used_volumes() + other.used_volumes();
        self.size.fits(cpu, ram) && volumes <= MAX_DISKS_PER_NODE
    }
}

/// Pack pending pods onto the fewest, cheapest projected nodes.
///
/// `sizes` must be ordered ascending by cost. Every pod starts on its own
/// node of the largest size; nodes are greedily merged while the merged
/// usage fits the largest size and the disk limit, then each node is
/// committed at the cheapest size covering its usage.
pub fn pack(pods: Vec<PodDemand>, sizes: &[NodeSize]) -> Result<Vec<ProjectedNode>, PackingError> {
    let largest = sizes.last().ok_or(PackingError::NoNodeSizes)?;

    let mut nodes: Vec<ProjectedNode> = pods
        .into_iter()
        .map(|pod| ProjectedNode::seed(largest, pod))
        .collect();

    while let Some(a) = nodes.iter().position(|n| !n.committed) {
        let partner = nodes
            .iter()
            .enumerate()
            .find(|(i, b)| *i != a && !b.committed && nodes[a].can_merge_with(b))
            .map(|(i, _)| i);

        match partner {
            Some(b) => {
                let merged = nodes.remove(b);
                let a = if b < a { a - 1 } else { a };
                nodes[a].pods.extend(merged.pods);
            }
            None => {
                let node = &mut nodes[a];
                let (cpu, ram) = (node.used_cpu(), node.used_ram());
                let size = sizes
                    .iter()
                    .find(|size| size.fits(cpu, ram))
                    .ok_or(PackingError::NoSizeLargeEnough {
                        cpu_cores: cpu,
                        ram_gib: ram,
                    })?;

                debug!(
                    size = %size.name,
                    pods = node.pods.len(),
                    cpu_cores = cpu,
                    ram_gib = ram,
                    "Committed projected node"
                );
                node.size = size.clone();
                node.committed = true;
            }
        }
    }

    Ok(nodes)
}
