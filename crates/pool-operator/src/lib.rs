//! GPU pool operator
//!
//! Binds GPU devices to the pools that claim them and keeps pool capacity and
//! usage up to date.

pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;

pub use infrastructure::k8s;
pub use infrastructure::kube_client;
