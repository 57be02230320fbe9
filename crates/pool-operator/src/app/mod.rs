//! Application module
//!
//! Reconcile drivers and process lifecycle around the domain handlers.

pub mod controller;
pub mod core;
pub mod tasks;

pub use core::Operator;
