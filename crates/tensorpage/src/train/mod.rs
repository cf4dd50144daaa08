//! Optimizer surface operating through the paging interception layer.

pub mod optim;

pub use optim::{Optimizer, Sgd};
