//! The paging core: residency-tracked handles, flat aggregates, and the
//! interception surface that makes every in-place mutation durable.

mod buffer;
mod flat;
mod handle;
mod ops;

pub use buffer::PagedBuffer;
pub use flat::{FlatParam, ParamView, ParamViews};
pub use handle::{PagedTensor, Residency};
pub use ops::PagedOps;
