//! # herd-model
//!
//! Resource records and workload descriptors shared by the kubeherd control
//! plane.
//!
//! ## Design Principles
//!
//! - Records are plain serializable data; behavior lives in the control plane
//! - Every persisted record implements [`Resource`] and is addressed by a
//!   stable string id assigned at construction
//! - Live action progress ([`ActionStatus`]) travels with the record so it
//!   can be rendered and persisted alongside it
//!
//! ## Modules
//!
//! - `records`: kubes, nodes, volumes, entrypoints, cloud accounts and node
//!   sizes
//! - `workload`: pods, containers and scheduling events observed in a kube
//! - `units`: CPU and memory quantity parsing

mod error;
mod records;
mod resource;
mod units;
mod workload;

pub use error::UnitError;
pub use records::*;
pub use resource::{new_resource_id, ActionStatus, Resource};
pub use units::{Bytes, Cores};
pub use workload::*;
