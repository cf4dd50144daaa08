mod env;
pub mod io;
pub mod paging;
pub mod tensor;
pub mod train;

pub use paging::{FlatParam, PagedBuffer, PagedOps, PagedTensor, ParamView, Residency};
pub use tensor::{DType, Shape, Tensor};
