//! Process-wide registry of in-flight actions.
//!
//! One actor task owns the `resource_id -> action` map. Every read and
//! mutation is a request/response round trip through its mailbox, so no two
//! callers ever touch the map concurrently. Replies always carry the entry
//! registered for the resource after the request was applied.
//!
//! `Fetch`, `Start` and `Stop` are the primitive operations. `Acquire` folds
//! the dedup check and the registration into a single request so that two
//! callers racing on the same resource cannot both observe an empty slot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use herd_model::ActionStatus;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{ActionError, ActionResult, RepeatedActionError};
use crate::actors::{spawn_actor, Actor, ActorHandle};

/// Mailbox capacity of the registry actor.
pub const REGISTRY_MAILBOX_SIZE: usize = 256;

// =============================================================================
// Entries
// =============================================================================

/// A registered action: identity plus its live, observable status.
#[derive(Debug)]
pub struct ActionEntry {
    action_id: String,
    resource_id: String,
    kind: &'static str,
    status: RwLock<ActionStatus>,
}

impl ActionEntry {
    pub fn new(kind: &'static str, resource_id: impl Into<String>, status: ActionStatus) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            kind,
            status: RwLock::new(status),
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Snapshot of the current status.
    pub async fn status(&self) -> ActionStatus {
        self.status.read().await.clone()
    }

    /// Human-readable label, e.g. `provisioning node 3f2c...`.
    pub async fn label(&self) -> String {
        let description = self.status.read().await.description.clone();
        format!("{} {} {}", description, self.kind, self.resource_id)
    }

    pub async fn is_cancelled(&self) -> bool {
        self.status.read().await.cancelled
    }

    /// Request cancellation. Work functions observe it at their checkpoints.
    pub async fn cancel(&self) {
        self.status.write().await.cancelled = true;
    }

    pub async fn steps_completed(&self) -> usize {
        self.status.read().await.steps_completed
    }

    pub(crate) async fn complete_step(&self, steps_completed: usize) {
        let mut status = self.status.write().await;
        status.error = None;
        status.steps_completed = steps_completed;
    }

    pub(crate) async fn resume_from(&self, steps_completed: usize) {
        self.status.write().await.steps_completed = steps_completed;
    }

    /// Count a failed attempt. Returns the retries so far.
    pub(crate) async fn record_failure(&self, error: &ActionError) -> u32 {
        let mut status = self.status.write().await;
        status.retries += 1;
        status.error = Some(error.to_string());
        status.retries
    }

    pub(crate) async fn mark_failed(&self) {
        self.status.write().await.failed = true;
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Dedup policy applied by [`RegistryMessage::Acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePolicy {
    /// Synchronous execution: any existing action is a conflict unless
    /// preempted.
    Now { cancel_existing: bool },

    /// Background execution: an existing action that exhausted its retries
    /// is superseded without being cancelled.
    Async { cancel_existing: bool },
}

impl AcquirePolicy {
    fn cancel_existing(&self) -> bool {
        match self {
            Self::Now { cancel_existing } | Self::Async { cancel_existing } => *cancel_existing,
        }
    }
}

type EntryReply = oneshot::Sender<Option<Arc<ActionEntry>>>;

/// Requests served by the registry actor.
#[derive(Debug)]
pub enum RegistryMessage {
    Fetch {
        resource_id: String,
        reply_to: EntryReply,
    },
    Start {
        entry: Arc<ActionEntry>,
        reply_to: EntryReply,
    },
    /// Remove the entry for a resource. With an `action_id`, only that
    /// action's entry is removed.
    Stop {
        resource_id: String,
        action_id: Option<String>,
        reply_to: EntryReply,
    },
    /// Atomically check for a conflicting action and register `entry`.
    /// Replies with the entry that was preempted or superseded, if any.
    Acquire {
        entry: Arc<ActionEntry>,
        policy: AcquirePolicy,
        reply_to: oneshot::Sender<Result<Option<Arc<ActionEntry>>, RepeatedActionError>>,
    },
    List {
        reply_to: oneshot::Sender<Vec<Arc<ActionEntry>>>,
    },
    /// Remove the entry only if it is in the terminal failed state.
    ClearFailed {
        resource_id: String,
        reply_to: oneshot::Sender<bool>,
    },
}

// =============================================================================
// Actor
// =============================================================================

#[derive(Default)]
struct RegistryActor {
    actions: HashMap<String, Arc<ActionEntry>>,
}

impl RegistryActor {
    async fn start(&mut self, entry: Arc<ActionEntry>) {
        let label = entry.label().await;
        info!(
            resource_id = %entry.resource_id(),
            action_id = %entry.action_id(),
            action = %label,
            "Action started"
        );
        self.actions.insert(entry.resource_id().to_string(), entry);
    }

    async fn stop(&mut self, resource_id: &str, action_id: Option<&str>) {
        let Some(current) = self.actions.get(resource_id) else {
            return;
        };
        if let Some(action_id) = action_id {
            if current.action_id() != action_id {
                debug!(resource_id, action_id, "Stop ignored, action no longer registered");
                return;
            }
        }
        if let Some(entry) = self.actions.remove(resource_id) {
            let label = entry.label().await;
            info!(
                resource_id,
                action_id = %entry.action_id(),
                action = %label,
                "Action ended"
            );
        }
    }

    async fn acquire(
        &mut self,
        entry: Arc<ActionEntry>,
        policy: AcquirePolicy,
    ) -> Result<Option<Arc<ActionEntry>>, RepeatedActionError> {
        let resource_id = entry.resource_id().to_string();
        let existing = self.actions.get(&resource_id).cloned();

        if let Some(existing) = &existing {
            if policy.cancel_existing() {
                existing.cancel().await;
                self.actions.remove(&resource_id);
                let label = existing.label().await;
                info!(
                    resource_id = %resource_id,
                    action_id = %existing.action_id(),
                    action = %label,
                    "Action cancelled"
                );
            } else {
                let exhausted = existing.status().await.retries_exhausted();
                if matches!(policy, AcquirePolicy::Now { .. }) || !exhausted {
                    return Err(RepeatedActionError { resource_id });
                }
                warn!(
                    resource_id = %resource_id,
                    action_id = %existing.action_id(),
                    "Superseding action that exhausted its retries"
                );
            }
        }

        self.start(entry).await;
        Ok(existing)
    }

    async fn clear_failed(&mut self, resource_id: &str) -> bool {
        let failed = match self.actions.get(resource_id) {
            Some(entry) => entry.status().await.failed,
            None => false,
        };
        if failed {
            self.stop(resource_id, None).await;
        }
        failed
    }
}

#[async_trait]
impl Actor for RegistryActor {
    type Message = RegistryMessage;

    fn name(&self) -> &str {
        "action_registry"
    }

    async fn handle(&mut self, msg: RegistryMessage) -> bool {
        match msg {
            RegistryMessage::Fetch {
                resource_id,
                reply_to,
            } => {
                let _ = reply_to.send(self.actions.get(&resource_id).cloned());
            }
            RegistryMessage::Start { entry, reply_to } => {
                let resource_id = entry.resource_id().to_string();
                self.start(entry).await;
                let _ = reply_to.send(self.actions.get(&resource_id).cloned());
            }
            RegistryMessage::Stop {
                resource_id,
                action_id,
                reply_to,
            } => {
                self.stop(&resource_id, action_id.as_deref()).await;
                let _ = reply_to.send(self.actions.get(&resource_id).cloned());
            }
            RegistryMessage::Acquire {
                entry,
                policy,
                reply_to,
            } => {
                let outcome = self.acquire(entry, policy).await;
                let _ = reply_to.send(outcome);
            }
            RegistryMessage::List { reply_to } => {
                let _ = reply_to.send(self.actions.values().cloned().collect());
            }
            RegistryMessage::ClearFailed {
                resource_id,
                reply_to,
            } => {
                let cleared = self.clear_failed(&resource_id).await;
                let _ = reply_to.send(cleared);
            }
        }
        true
    }

    async fn on_stop(&mut self) {
        if !self.actions.is_empty() {
            warn!(
                in_flight = self.actions.len(),
                "Action registry stopping with actions still registered"
            );
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to the action registry.
#[derive(Clone)]
pub struct ActionRegistry {
    handle: ActorHandle<RegistryMessage>,
}

impl ActionRegistry {
    /// Spawn the registry actor. It stops when `shutdown` turns true or every
    /// handle is dropped.
    pub fn spawn(shutdown: watch::Receiver<bool>) -> (Self, JoinHandle<()>) {
        let (handle, task) = spawn_actor(RegistryActor::default(), REGISTRY_MAILBOX_SIZE, shutdown);
        (Self { handle }, task)
    }

    /// Spawn a registry that lives as long as its handles.
    pub fn new() -> Self {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Self::spawn(shutdown_rx).0
    }

    pub async fn fetch(&self, resource_id: &str) -> ActionResult<Option<Arc<ActionEntry>>> {
        let resource_id = resource_id.to_string();
        Ok(self
            .handle
            .request(|reply_to| RegistryMessage::Fetch {
                resource_id,
                reply_to,
            })
            .await?)
    }

    pub async fn start(&self, entry: Arc<ActionEntry>) -> ActionResult<Option<Arc<ActionEntry>>> {
        Ok(self
            .handle
            .request(|reply_to| RegistryMessage::Start { entry, reply_to })
            .await?)
    }

    /// Remove whatever action is registered for `resource_id`.
    pub async fn stop(&self, resource_id: &str) -> ActionResult<Option<Arc<ActionEntry>>> {
        self.stop_request(resource_id.to_string(), None).await
    }

    /// Remove `entry`, unless another action has replaced it meanwhile.
    pub async fn stop_entry(&self, entry: &ActionEntry) -> ActionResult<Option<Arc<ActionEntry>>> {
        self.stop_request(
            entry.resource_id().to_string(),
            Some(entry.action_id().to_string()),
        )
        .await
    }

    async fn stop_request(
        &self,
        resource_id: String,
        action_id: Option<String>,
    ) -> ActionResult<Option<Arc<ActionEntry>>> {
        Ok(self
            .handle
            .request(|reply_to| RegistryMessage::Stop {
                resource_id,
                action_id,
                reply_to,
            })
            .await?)
    }

    /// Register `entry` unless a conflicting action holds its resource.
    pub async fn acquire(
        &self,
        entry: Arc<ActionEntry>,
        policy: AcquirePolicy,
    ) -> ActionResult<Option<Arc<ActionEntry>>> {
        let outcome = self
            .handle
            .request(|reply_to| RegistryMessage::Acquire {
                entry,
                policy,
                reply_to,
            })
            .await?;
        Ok(outcome?)
    }

    pub async fn list(&self) -> ActionResult<Vec<Arc<ActionEntry>>> {
        Ok(self
            .handle
            .request(|reply_to| RegistryMessage::List { reply_to })
            .await?)
    }

    /// Release the slot held by a failed action. Returns false if the
    /// resource has no action or its action has not failed.
    pub async fn clear_failed(&self, resource_id: &str) -> ActionResult<bool> {
        let resource_id = resource_id.to_string();
        Ok(self
            .handle
            .request(|reply_to| RegistryMessage::ClearFailed {
                resource_id,
                reply_to,
            })
            .await?)
    }

    /// Status of the action registered for `resource_id`, if any.
    pub async fn status_of(&self, resource_id: &str) -> ActionResult<Option<ActionStatus>> {
        match self.fetch(resource_id).await? {
            Some(entry) => Ok(Some(entry.status().await)),
            None => Ok(None),
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(resource_id: &str, max_retries: u32) -> Arc<ActionEntry> {
        Arc::new(ActionEntry::new(
            "node",
            resource_id,
            ActionStatus::new("provisioning", max_retries),
        ))
    }

    #[tokio::test]
    async fn test_fetch_start_stop() {
        let registry = ActionRegistry::new();
        assert!(registry.fetch("node-1").await.unwrap().is_none());

        let first = entry("node-1", 3);
        let registered = registry.start(first.clone()).await.unwrap().unwrap();
        assert_eq!(registered.action_id(), first.action_id());

        let fetched = registry.fetch("node-1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&fetched, &first));

        assert!(registry.stop("node-1").await.unwrap().is_none());
        assert!(registry.fetch("node-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_entry_ignores_replaced_action() {
        let registry = ActionRegistry::new();
        let old = entry("node-1", 3);
        let new = entry("node-1", 3);

        registry.start(old.clone()).await.unwrap();
        registry.start(new.clone()).await.unwrap();

        let remaining = registry.stop_entry(&old).await.unwrap().unwrap();
        assert_eq!(remaining.action_id(), new.action_id());
    }

    #[tokio::test]
    async fn test_acquire_now_conflicts() {
        let registry = ActionRegistry::new();
        registry
            .acquire(entry("node-1", 3), AcquirePolicy::Now { cancel_existing: false })
            .await
            .unwrap();

        let err = registry
            .acquire(entry("node-1", 3), AcquirePolicy::Now { cancel_existing: false })
            .await
            .unwrap_err();
        assert!(err.is_repeated());
    }

    #[tokio::test]
    async fn test_acquire_now_conflicts_even_with_exhausted_action() {
        let registry = ActionRegistry::new();
        registry.start(entry("node-1", 0)).await.unwrap();

        let err = registry
            .acquire(entry("node-1", 3), AcquirePolicy::Now { cancel_existing: false })
            .await
            .unwrap_err();
        assert!(err.is_repeated());
    }

    #[tokio::test]
    async fn test_acquire_preempts_and_cancels() {
        let registry = ActionRegistry::new();
        let old = entry("node-1", 3);
        registry.start(old.clone()).await.unwrap();

        let new = entry("node-1", 3);
        let preempted = registry
            .acquire(new.clone(), AcquirePolicy::Async { cancel_existing: true })
            .await
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(&preempted, &old));
        assert!(old.is_cancelled().await);
        let current = registry.fetch("node-1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&current, &new));
    }

    #[tokio::test]
    async fn test_acquire_async_supersedes_exhausted_action() {
        let registry = ActionRegistry::new();
        let stuck = entry("node-1", 2);
        stuck.status.write().await.retries = 2;
        registry.start(stuck.clone()).await.unwrap();

        let new = entry("node-1", 2);
        let superseded = registry
            .acquire(new.clone(), AcquirePolicy::Async { cancel_existing: false })
            .await
            .unwrap()
            .unwrap();

        assert!(Arc::ptr_eq(&superseded, &stuck));
        assert!(!stuck.is_cancelled().await);
    }

    #[tokio::test]
    async fn test_acquire_async_conflicts_with_retrying_action() {
        let registry = ActionRegistry::new();
        let busy = entry("node-1", 5);
        busy.status.write().await.retries = 1;
        registry.start(busy).await.unwrap();

        let err = registry
            .acquire(entry("node-1", 5), AcquirePolicy::Async { cancel_existing: false })
            .await
            .unwrap_err();
        assert!(err.is_repeated());
    }

    #[tokio::test]
    async fn test_concurrent_acquires_register_exactly_one() {
        let registry = ActionRegistry::new();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .acquire(entry("kube-1", 3), AcquirePolicy::Now { cancel_existing: false })
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_failed() {
        let registry = ActionRegistry::new();
        let running = entry("node-1", 3);
        registry.start(running.clone()).await.unwrap();
        assert!(!registry.clear_failed("node-1").await.unwrap());

        running.mark_failed().await;
        assert!(registry.clear_failed("node-1").await.unwrap());
        assert!(registry.fetch("node-1").await.unwrap().is_none());
        assert!(!registry.clear_failed("node-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_status_of() {
        let registry = ActionRegistry::new();
        assert!(registry.status_of("vol-1").await.unwrap().is_none());

        registry.start(entry("vol-1", 4)).await.unwrap();
        let status = registry.status_of("vol-1").await.unwrap().unwrap();
        assert_eq!(status.description, "provisioning");
        assert_eq!(status.max_retries, 4);
    }

    #[tokio::test]
    async fn test_label() {
        let e = entry("abc", 1);
        assert_eq!(e.label().await, "provisioning node abc");
    }
}
