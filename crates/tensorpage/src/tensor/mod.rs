//! Host-side numeric substrate for the paging core.
//!
//! The paging layer treats this module the way it would treat an external
//! math library: it supplies byte-exact buffers, element-wise kernels, and a
//! held-out gradient buffer per tensor, and knows nothing about files or
//! residency.

pub mod dtype;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use host_tensor::Tensor;
pub use shape::Shape;
