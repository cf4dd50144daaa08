//! Dispatch interception surface shared by every paged object.

use crate::tensor::Tensor;
use anyhow::Result;

/// Operation surface of a paged object.
///
/// Every provided method routes through [`PagedOps::apply`] or
/// [`PagedOps::apply_inplace`], so each call site observes the paging
/// contract: load the backing tensor before use, and write an in-place
/// mutation back to the associated file region before returning. Out-of-place
/// results are ordinary in-memory tensors and leave the receiver's residency
/// and file association untouched.
pub trait PagedOps {
    /// Loads the backing tensor from its file region if it is not resident.
    fn ensure_resident(&mut self) -> Result<()>;

    /// Borrows the resident backing tensor, failing if it is on disk.
    fn resident(&self) -> Result<&Tensor>;

    /// Mutably borrows the resident backing tensor, failing if it is on disk.
    fn resident_mut(&mut self) -> Result<&mut Tensor>;

    /// Writes the resident tensor back to its file region. A no-op when no
    /// file association has been recorded.
    fn writeback(&mut self) -> Result<()>;

    /// Adds `delta` element-wise into the gradient buffer, loading it on
    /// demand first and flushing it afterwards when it has a file region of
    /// its own.
    fn accumulate_grad(&mut self, delta: &Tensor) -> Result<()>;

    /// Returns a snapshot of the gradient buffer, loading it on demand.
    fn grad_tensor(&mut self) -> Result<Option<Tensor>>;

    /// Clears the gradient buffer through the same interception path as any
    /// other in-place mutation.
    fn zero_grad(&mut self) -> Result<()>;

    /// Runs a read-only operation against the real backing tensor and returns
    /// its ordinary in-memory result.
    fn apply(&mut self, op: &dyn Fn(&Tensor) -> Tensor) -> Result<Tensor> {
        self.ensure_resident()?;
        Ok(op(self.resident()?))
    }

    /// Runs an in-place mutation against the real backing tensor, then writes
    /// the updated contents back to the associated file region.
    fn apply_inplace(&mut self, op: &dyn Fn(&mut Tensor)) -> Result<()> {
        self.ensure_resident()?;
        op(self.resident_mut()?);
        self.writeback()
    }

    /// In-place scalar addition.
    fn add_assign_scalar(&mut self, rhs: f32) -> Result<()> {
        self.apply_inplace(&|t| t.map_inplace(|v| v + rhs))
    }

    /// In-place scalar multiplication.
    fn mul_assign_scalar(&mut self, rhs: f32) -> Result<()> {
        self.apply_inplace(&|t| t.map_inplace(|v| v * rhs))
    }

    /// In-place `self += alpha * other`.
    fn add_scaled(&mut self, other: &Tensor, alpha: f32) -> Result<()> {
        self.apply_inplace(&|t| t.apply_binary_inplace(other, |a, b| a + alpha * b))
    }

    /// In-place constant fill.
    fn fill(&mut self, value: f32) -> Result<()> {
        self.apply_inplace(&|t| t.fill(value))
    }

    /// Out-of-place scalar addition; the receiver is left untouched.
    fn add_scalar(&mut self, rhs: f32) -> Result<Tensor> {
        self.apply(&|t| {
            let mut out = t.clone();
            out.map_inplace(|v| v + rhs);
            out
        })
    }

    /// Sums every element of the backing tensor.
    fn sum(&mut self) -> Result<f32> {
        self.ensure_resident()?;
        Ok(self.resident()?.sum())
    }
}
