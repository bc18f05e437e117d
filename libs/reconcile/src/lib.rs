//! Capacity decisions and convergence helpers.
//!
//! This library holds the deterministic half of the capacity scheduler and
//! the polling primitive that cancellable provisioning waits are built on:
//!
//! - **Demand**: which pending pods are starved for capacity.
//! - **Packing**: grouping pending pods onto the fewest, cheapest new nodes.
//! - **Lifecycle**: when an idle node may be retired, and when a node of a
//!   given size is still spinning up.
//! - **Waiting**: bounded polling with a fixed interval.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs
//! - No projected node exceeds its assigned size or the per-node disk limit

mod lifecycle;
mod packing;
mod wait;

use std::time::Duration;

use herd_model::Event;
use thiserror::Error;

pub use lifecycle::{already_spinning_up, should_retire};
pub use packing::{pack, PackingError, ProjectedNode};
pub use wait::wait_for;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Timeout waiting for convergence.
    #[error("timed out after {elapsed:?} waiting for {resource}")]
    Timeout {
        resource: String,
        elapsed: Duration,
    },
}

/// Maximum block-storage volumes attachable to one node.
pub const MAX_DISKS_PER_NODE: usize = 11;

/// Nodes younger than this are never retired and count as spinning up.
///
/// Pending pods can take a while to land on a fresh node; without the grace
/// period the scaler would delete a new node before anything is scheduled
/// on it, or create a second one for the same demand.
pub const MIN_AGE_TO_EXIST: Duration = Duration::from_secs(20 * 60);

/// How long to keep batching pending pods before scaling.
pub const WAIT_BEFORE_SCALE: Duration = Duration::from_secs(2 * 60);

/// Interval between pending-pod scans while batching.
pub const PENDING_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum pods of one logical cluster sharing a node. Not enforced by
/// [`pack`].
pub const MAX_CLUSTERED_PODS_PER_NODE: usize = 2;

/// Event message fragments that mark a pod as starved for capacity.
pub const TRACKED_EVENT_MESSAGES: [&str; 6] = [
    "MatchNodeSelector",
    "PodExceedsMaxPodNumber",
    "PodExceedsFreeMemory",
    "PodExceedsFreeCPU",
    "no nodes available to schedule pods",
    "failed to fit in any node",
];

/// Returns true if any event reports a resource-starvation or no-fit condition.
pub fn has_tracked_event<'a, I>(events: I) -> bool
where
    I: IntoIterator<Item = &'a Event>,
{
    events.into_iter().any(|event| {
        TRACKED_EVENT_MESSAGES
            .iter()
            .any(|message| event.message.contains(message))
    })
}
