//! kubeherd control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose the
//! library surface to enable integration testing and reuse.

pub mod actions;
pub mod actors;
pub mod config;
pub mod inspector;
pub mod provider;
pub mod resources;
pub mod scheduler;
pub mod state;
pub mod store;
