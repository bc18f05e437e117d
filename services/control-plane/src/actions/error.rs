//! Action error types.

use herd_reconcile::ReconcileError;
use thiserror::Error;

use crate::actors::ActorError;
use crate::store::StoreError;

/// A new action collided with an in-flight action on the same resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("already performing an action for {resource_id}")]
pub struct RepeatedActionError {
    pub resource_id: String,
}

/// Errors produced by running actions and their work functions.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Repeated(#[from] RepeatedActionError),

    /// The action was cancelled at a cancellation checkpoint.
    #[error("action cancelled while waiting for {waiting_for}")]
    Cancelled { waiting_for: String },

    #[error(transparent)]
    Timeout(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A cloud provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("action registry unavailable: {0}")]
    Registry(#[from] ActorError),

    /// The background task running the action panicked or was aborted.
    #[error("action task failed: {0}")]
    Task(String),
}

impl ActionError {
    /// Returns true for dedup conflicts.
    pub fn is_repeated(&self) -> bool {
        matches!(self, Self::Repeated(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

pub type ActionResult<T> = Result<T, ActionError>;
