//! Actions: single-flight mutating work bound to one resource.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use herd_model::{ActionStatus, Resource};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::error::{ActionError, ActionResult};
use super::registry::{AcquirePolicy, ActionEntry, ActionRegistry};
use crate::store::Store;

/// The body of an action. Called once per attempt.
pub type WorkFn<R> = Arc<dyn Fn(ActionContext<R>) -> BoxFuture<'static, ActionResult<()>> + Send + Sync>;

/// A unit of mutating work on one persisted resource.
///
/// Nothing happens until [`Action::now`] or [`Action::spawn`] is called.
/// Both refresh the resource from the store and register the action so
/// that at most one action per resource is in flight.
pub struct Action<R: Resource> {
    registry: ActionRegistry,
    store: Store,
    resource: R,
    status: ActionStatus,
    cancel_existing: bool,
    work: WorkFn<R>,
}

impl<R: Resource> Action<R> {
    pub fn new<F, Fut>(
        registry: ActionRegistry,
        store: Store,
        resource: R,
        status: ActionStatus,
        work: F,
    ) -> Self
    where
        F: Fn(ActionContext<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<()>> + Send + 'static,
    {
        Self {
            registry,
            store,
            resource,
            status,
            cancel_existing: false,
            work: Arc::new(move |ctx| work(ctx).boxed()),
        }
    }

    /// Preempt any action already registered for the resource instead of
    /// failing with a repeated-action error.
    pub fn cancel_existing(mut self, cancel_existing: bool) -> Self {
        self.cancel_existing = cancel_existing;
        self
    }

    pub fn resource_id(&self) -> &str {
        self.resource.id()
    }

    /// Reload the resource and build the registry entry, picking up the
    /// progress of an interrupted run with the same description.
    async fn prepare(&self) -> ActionResult<(Arc<ActionEntry>, R)> {
        let resource: R = self.store.get(self.resource.id()).await?;
        let entry = ActionEntry::new(R::KIND, resource.id(), self.status.clone());

        if let Some(persisted) = resource.status() {
            if persisted.description == self.status.description && persisted.steps_completed > 0 {
                info!(
                    resource_id = %resource.id(),
                    kind = R::KIND,
                    steps_completed = persisted.steps_completed,
                    "Resuming action from persisted progress"
                );
                entry.resume_from(persisted.steps_completed).await;
            }
        }

        Ok((Arc::new(entry), resource))
    }

    /// Run the work function once on the calling task.
    ///
    /// Fails with a repeated-action error if another action holds the
    /// resource and `cancel_existing` is not set. The work function's error
    /// is returned as-is; there are no retries. A panicking work function
    /// is reported as [`ActionError::Task`] and the resource is released.
    pub async fn now(self) -> ActionResult<()> {
        let (entry, resource) = self.prepare().await?;
        self.registry
            .acquire(
                entry.clone(),
                AcquirePolicy::Now {
                    cancel_existing: self.cancel_existing,
                },
            )
            .await?;

        let ctx = ActionContext::new(entry.clone(), self.store.clone(), resource);
        let mut result = attempt(&self.work, ctx.clone()).await;
        if result.is_ok() {
            result = ctx.settle().await;
        }

        if !entry.is_cancelled().await {
            self.registry.stop_entry(&entry).await?;
        }
        result
    }

    /// Run the work function on a background task, retrying failures up to
    /// `max_retries` attempts in total.
    ///
    /// An action that exhausts its attempts is marked failed and stays
    /// registered, blocking further actions on the resource until it is
    /// cleared or preempted.
    pub async fn spawn(self) -> ActionResult<BackgroundAction> {
        let (entry, resource) = self.prepare().await?;
        self.registry
            .acquire(
                entry.clone(),
                AcquirePolicy::Async {
                    cancel_existing: self.cancel_existing,
                },
            )
            .await?;

        let ctx = ActionContext::new(entry.clone(), self.store.clone(), resource);
        let task = tokio::spawn(run_with_retries(self.registry.clone(), self.work.clone(), ctx));

        Ok(BackgroundAction { entry, task })
    }
}

async fn run_with_retries<R: Resource>(
    registry: ActionRegistry,
    work: WorkFn<R>,
    ctx: ActionContext<R>,
) -> ActionResult<()> {
    let entry = ctx.entry.clone();

    loop {
        let status = entry.status().await;
        if status.retries_exhausted() {
            entry.mark_failed().await;
            let label = entry.label().await;
            error!(
                resource_id = %entry.resource_id(),
                action_id = %entry.action_id(),
                action = %label,
                retries = status.retries,
                last_error = status.error.as_deref().unwrap_or(""),
                "Action failed, retries exhausted"
            );
            return Ok(());
        }
        if status.cancelled {
            break;
        }

        match attempt(&work, ctx.clone()).await {
            Ok(()) => {
                if let Err(e) = ctx.settle().await {
                    warn!(resource_id = %entry.resource_id(), error = %e, "Failed to clear persisted action status");
                }
                break;
            }
            Err(e) => {
                let retries = entry.record_failure(&e).await;
                let label = entry.label().await;
                error!(
                    resource_id = %entry.resource_id(),
                    action_id = %entry.action_id(),
                    action = %label,
                    retries,
                    max_retries = status.max_retries,
                    error = %e,
                    "Action attempt failed"
                );
            }
        }
    }

    if !entry.is_cancelled().await {
        registry.stop_entry(&entry).await?;
    }
    Ok(())
}

/// Run one attempt of the work function. A panic, whether raised while
/// building the future or while polling it, becomes [`ActionError::Task`].
async fn attempt<R: Resource>(work: &WorkFn<R>, ctx: ActionContext<R>) -> ActionResult<()> {
    match AssertUnwindSafe(async move { work(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(ActionError::Task(format!(
            "work panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// An action running on a background task.
pub struct BackgroundAction {
    entry: Arc<ActionEntry>,
    task: JoinHandle<ActionResult<()>>,
}

impl BackgroundAction {
    pub fn entry(&self) -> &Arc<ActionEntry> {
        &self.entry
    }

    pub fn action_id(&self) -> &str {
        self.entry.action_id()
    }

    /// Live status of the running action.
    pub async fn status(&self) -> ActionStatus {
        self.entry.status().await
    }

    /// Wait for the action to finish and return its final status.
    pub async fn join(self) -> ActionResult<ActionStatus> {
        self.task
            .await
            .map_err(|e| ActionError::Task(e.to_string()))??;
        Ok(self.entry.status().await)
    }
}

/// Handed to the work function on every attempt.
pub struct ActionContext<R> {
    entry: Arc<ActionEntry>,
    store: Store,
    resource: Arc<Mutex<R>>,
}

impl<R> Clone for ActionContext<R> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            store: self.store.clone(),
            resource: self.resource.clone(),
        }
    }
}

impl<R: Resource> ActionContext<R> {
    fn new(entry: Arc<ActionEntry>, store: Store, resource: R) -> Self {
        Self {
            entry,
            store,
            resource: Arc::new(Mutex::new(resource)),
        }
    }

    pub fn entry(&self) -> &Arc<ActionEntry> {
        &self.entry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Snapshot of the resource as the action currently sees it.
    pub async fn resource(&self) -> R {
        self.resource.lock().await.clone()
    }

    pub async fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut R),
    {
        f(&mut *self.resource.lock().await);
    }

    pub async fn is_cancelled(&self) -> bool {
        self.entry.is_cancelled().await
    }

    /// Fail with [`ActionError::Cancelled`] if the action has been cancelled.
    pub async fn checkpoint(&self, waiting_for: &str) -> ActionResult<()> {
        if self.entry.is_cancelled().await {
            return Err(ActionError::Cancelled {
                waiting_for: waiting_for.to_string(),
            });
        }
        Ok(())
    }

    /// Persist the resource together with the live action status.
    pub async fn save(&self) -> ActionResult<()> {
        let status = self.entry.status().await;
        let mut resource = self.resource.lock().await;
        resource.set_status(Some(status));
        self.store.save(&*resource).await?;
        Ok(())
    }

    /// Drop the persisted status once the work has succeeded. A record the
    /// work removed is left alone.
    async fn settle(&self) -> ActionResult<()> {
        let mut resource = self.resource.lock().await;
        if resource.status().is_none() {
            return Ok(());
        }
        resource.set_status(None);
        match self.store.save(&*resource).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => Ok(other?),
        }
    }

    /// Poll `check` until it returns true, bailing out as soon as the action
    /// is cancelled or `timeout` elapses.
    pub async fn cancellable_wait_for<F, Fut>(
        &self,
        desc: &str,
        timeout: Duration,
        interval: Duration,
        mut check: F,
    ) -> ActionResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ActionResult<bool>>,
    {
        herd_reconcile::wait_for(desc, timeout, interval, || {
            let ctx = self.clone();
            let waiting_for = desc.to_string();
            let poll = check();
            async move {
                ctx.checkpoint(&waiting_for).await?;
                poll.await
            }
        })
        .await
    }
}
