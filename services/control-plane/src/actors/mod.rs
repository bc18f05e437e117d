//! Actor primitives used by the single-owner coordinators of the control
//! plane (currently the action registry).

pub mod framework;

pub use framework::{spawn_actor, Actor, ActorError, ActorHandle};
