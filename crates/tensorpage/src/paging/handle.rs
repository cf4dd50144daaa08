//! Residency-tracked proxy standing in for one logical buffer.

use crate::io::block;
use crate::paging::ops::PagedOps;
use crate::tensor::{DType, Shape, Tensor};
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Where a paged object's bytes currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    InMemory,
    OnDisk,
}

/// Target location within a page file.
#[derive(Debug, Clone)]
pub(crate) struct FileParams {
    pub path: PathBuf,
    pub offset: u64,
}

/// Proxy for one logical buffer whose bytes live either in memory or at a
/// fixed byte region of a page file.
///
/// Exactly one of the two holds at any time: a resident tensor is owned
/// exclusively by the handle, and dropping it is the only way to transition
/// to [`Residency::OnDisk`]. The gradient buffer is itself a `PagedTensor`,
/// so it carries the same residency duality as the data it belongs to.
#[derive(Debug)]
pub struct PagedTensor {
    shape: Shape,
    dtype: DType,
    data: Option<Tensor>,
    file: Option<FileParams>,
    grad: Option<Box<PagedTensor>>,
}

impl PagedTensor {
    /// Wraps an existing in-memory tensor; residency starts as `InMemory`
    /// with no file association.
    pub fn from_tensor(tensor: Tensor) -> Self {
        PagedTensor {
            shape: tensor.shape().clone(),
            dtype: tensor.dtype(),
            data: Some(tensor),
            file: None,
            grad: None,
        }
    }

    /// Points a fresh handle at a file region directly; residency starts as
    /// `OnDisk` and the first access loads the full region.
    pub fn on_file(shape: Shape, dtype: DType, path: impl AsRef<Path>, offset: u64) -> Self {
        PagedTensor {
            shape,
            dtype,
            data: None,
            file: Some(FileParams {
                path: path.as_ref().to_path_buf(),
                offset,
            }),
            grad: None,
        }
    }

    /// Declared shape of the logical buffer.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Declared element type of the logical buffer.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Current residency state, derived from buffer presence so the
    /// exactly-one invariant holds structurally.
    pub fn residency(&self) -> Residency {
        if self.data.is_some() {
            Residency::InMemory
        } else {
            Residency::OnDisk
        }
    }

    /// Reports whether the backing tensor is currently in memory.
    pub fn is_resident(&self) -> bool {
        self.data.is_some()
    }

    /// Returns the recorded file association, if any.
    pub fn file_params(&self) -> Option<(&Path, u64)> {
        self.file.as_ref().map(|f| (f.path.as_path(), f.offset))
    }

    /// Records the target file region without moving any data. Idempotent and
    /// callable before or after residency transitions; required before
    /// `to_file` can be used.
    pub fn set_file_params(&mut self, path: impl AsRef<Path>, offset: u64) {
        self.file = Some(FileParams {
            path: path.as_ref().to_path_buf(),
            offset,
        });
    }

    /// Flushes the resident tensor to the recorded file region. With
    /// `release_tensor_after_write` the buffer is dropped afterwards, freeing
    /// memory and transitioning to `OnDisk`; otherwise the handle stays
    /// resident with disk holding a synchronized copy.
    pub fn to_file(&mut self, release_tensor_after_write: bool) -> Result<()> {
        let file = match self.file.as_ref() {
            Some(file) => file,
            None => bail!("handle has no file association; call set_file_params first"),
        };
        let tensor = match self.data.as_ref() {
            Some(tensor) => tensor,
            None => bail!("to_file requires an in-memory tensor; handle is already on disk"),
        };
        block::write(tensor, &file.path, file.offset)?;
        if release_tensor_after_write {
            self.data = None;
        }
        Ok(())
    }

    /// Returns the backing tensor, loading the full file region into a fresh
    /// allocation when the handle is on disk. No I/O when already resident.
    pub fn to_tensor(&mut self) -> Result<&Tensor> {
        self.ensure_resident()?;
        self.resident()
    }

    /// Re-targets the file association and unconditionally discards any
    /// cached in-memory tensor, forcing the next access to reload from the
    /// new location.
    pub fn point_to_file(&mut self, path: impl AsRef<Path>, offset: u64) {
        self.file = Some(FileParams {
            path: path.as_ref().to_path_buf(),
            offset,
        });
        self.data = None;
    }

    /// Returns the gradient handle, allocating a zeroed in-memory gradient of
    /// the declared shape on first use.
    pub fn ensure_grad(&mut self) -> &mut PagedTensor {
        let shape = self.shape.clone();
        self.grad
            .get_or_insert_with(|| Box::new(PagedTensor::from_tensor(Tensor::zeros(shape))))
    }

    /// Borrows the gradient handle, if one exists.
    pub fn grad(&self) -> Option<&PagedTensor> {
        self.grad.as_deref()
    }

    /// Mutably borrows the gradient handle, if one exists.
    pub fn grad_mut(&mut self) -> Option<&mut PagedTensor> {
        self.grad.as_deref_mut()
    }
}

impl PagedOps for PagedTensor {
    fn ensure_resident(&mut self) -> Result<()> {
        if self.data.is_some() {
            return Ok(());
        }
        let file = match self.file.as_ref() {
            Some(file) => file.clone(),
            None => bail!("handle is on disk but has no file association to load from"),
        };
        let mut fresh = Tensor::zeros_dtype(self.shape.clone(), self.dtype);
        block::read(&mut fresh, &file.path, file.offset)?;
        self.data = Some(fresh);
        Ok(())
    }

    fn resident(&self) -> Result<&Tensor> {
        match self.data.as_ref() {
            Some(tensor) => Ok(tensor),
            None => bail!("backing tensor is not resident"),
        }
    }

    fn resident_mut(&mut self) -> Result<&mut Tensor> {
        match self.data.as_mut() {
            Some(tensor) => Ok(tensor),
            None => bail!("backing tensor is not resident"),
        }
    }

    fn writeback(&mut self) -> Result<()> {
        let file = match self.file.as_ref() {
            Some(file) => file,
            None => return Ok(()),
        };
        let tensor = match self.data.as_ref() {
            Some(tensor) => tensor,
            None => bail!("writeback requires a resident tensor"),
        };
        block::write(tensor, &file.path, file.offset)
    }

    fn accumulate_grad(&mut self, delta: &Tensor) -> Result<()> {
        let grad = self.ensure_grad();
        grad.apply_inplace(&|t| t.apply_binary_inplace(delta, |a, b| a + b))
    }

    fn grad_tensor(&mut self) -> Result<Option<Tensor>> {
        match self.grad.as_deref_mut() {
            Some(grad) => {
                grad.ensure_resident()?;
                Ok(Some(grad.resident()?.clone()))
            }
            None => Ok(None),
        }
    }

    fn zero_grad(&mut self) -> Result<()> {
        match self.grad.as_deref_mut() {
            Some(grad) => grad.fill(0.0),
            None => Ok(()),
        }
    }
}
