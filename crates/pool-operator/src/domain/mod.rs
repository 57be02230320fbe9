//! Pool selection and accounting logic, independent of the API server.

pub mod assignment;
pub mod capacity;
pub mod device_selector;
pub mod device_state;
pub mod label_selector;
#[cfg(test)]
pub mod mock;
pub mod retry;
pub mod selection;
pub mod store;
pub mod usage;
