//! Checkpointed multi-step procedures.
//!
//! A procedure runs inside an action's work function. Each completed step
//! advances the action's `steps_completed` counter and persists the record,
//! so a retried attempt (or a restarted process resuming the same action)
//! skips the steps that already succeeded.

use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};
use herd_model::Resource;
use tracing::{debug, warn};

use super::action::ActionContext;
use super::error::ActionResult;

type StepFn<R> = Box<dyn FnOnce(ActionContext<R>) -> BoxFuture<'static, ActionResult<()>> + Send>;

struct Step<R> {
    description: String,
    run: StepFn<R>,
}

/// An ordered list of steps bound to one action.
///
/// Step indices are counted per action, so an action runs at most one
/// procedure.
pub struct Procedure<R> {
    name: String,
    ctx: ActionContext<R>,
    steps: Vec<Step<R>>,
}

impl<R: Resource> Procedure<R> {
    pub fn new(name: impl Into<String>, ctx: &ActionContext<R>) -> Self {
        Self {
            name: name.into(),
            ctx: ctx.clone(),
            steps: Vec::new(),
        }
    }

    pub fn step<F, Fut>(mut self, description: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(ActionContext<R>) -> Fut + Send + 'static,
        Fut: Future<Output = ActionResult<()>> + Send + 'static,
    {
        self.steps.push(Step {
            description: description.into(),
            run: Box::new(move |ctx| f(ctx).boxed()),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step not yet completed, stopping at the first failure.
    pub async fn run(self) -> ActionResult<()> {
        let entry = self.ctx.entry().clone();
        let completed = entry.steps_completed().await;

        for (index, step) in self.steps.into_iter().enumerate() {
            if index < completed {
                debug!(
                    procedure = %self.name,
                    step = %step.description,
                    resource_id = %entry.resource_id(),
                    "Skipping completed step"
                );
                continue;
            }

            debug!(
                procedure = %self.name,
                step = %step.description,
                resource_id = %entry.resource_id(),
                "Running step"
            );
            if let Err(e) = (step.run)(self.ctx.clone()).await {
                warn!(
                    procedure = %self.name,
                    step = %step.description,
                    resource_id = %entry.resource_id(),
                    error = %e,
                    "Step failed"
                );
                return Err(e);
            }

            entry.complete_step(index + 1).await;
            self.ctx.save().await?;
        }

        Ok(())
    }
}
