//! Single-flight actions on persisted resources.
//!
//! - [`ActionRegistry`]: the process-wide `resource_id -> action` map
//! - [`Action`]: mutating work run synchronously (`now`) or on a background
//!   task with retries (`spawn`)
//! - [`Procedure`]: checkpointed steps inside an action's work function

mod action;
mod error;
mod procedure;
mod registry;

pub use action::{Action, ActionContext, BackgroundAction, WorkFn};
pub use error::{ActionError, ActionResult, RepeatedActionError};
pub use procedure::Procedure;
pub use registry::{AcquirePolicy, ActionEntry, ActionRegistry, RegistryMessage, REGISTRY_MAILBOX_SIZE};
