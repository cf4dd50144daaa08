//! Flattening aggregate: many logical buffers, one contiguous backing region.

use crate::paging::handle::PagedTensor;
use crate::paging::ops::PagedOps;
use crate::tensor::{DType, Shape, Tensor};
use anyhow::{ensure, Result};
use std::path::Path;

/// Mapping of one constituent onto the flat backing buffer: the arena-plus-
/// index-range model, kept instead of stored slices so view validity is an
/// explicit contract.
#[derive(Debug, Clone)]
pub(crate) struct ParamSpan {
    pub dims: Vec<usize>,
    pub offset: usize,
    pub numel: usize,
}

/// Non-owning shaped view of one constituent inside a flat backing buffer.
///
/// The borrow ties the view's validity to the aggregate's current residency
/// generation: views cannot outlive a `point_to_file` or a release, because
/// both require a fresh `&mut` borrow of the aggregate.
#[derive(Debug, Clone, Copy)]
pub struct ParamView<'a> {
    pub(crate) dims: &'a [usize],
    pub(crate) data: &'a [f32],
}

impl<'a> ParamView<'a> {
    /// Logical dimensions of the constituent.
    pub fn dims(&self) -> &[usize] {
        self.dims
    }

    /// Borrows the constituent's elements within the backing buffer.
    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Number of elements in the view.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Copies the view out into an owned tensor.
    pub fn to_tensor(&self) -> Result<Tensor> {
        Tensor::from_vec(Shape::new(self.dims.to_vec()), self.data.to_vec())
    }
}

/// Lazy, restartable sequence of constituent views, recomputed from the
/// current in-memory state on every `get_param_views` call.
pub struct ParamViews<'a> {
    data: &'a [f32],
    spans: std::slice::Iter<'a, ParamSpan>,
}

impl<'a> Iterator for ParamViews<'a> {
    type Item = ParamView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.spans.next()?;
        Some(ParamView {
            dims: &span.dims,
            data: &self.data[span.offset..span.offset + span.numel],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.spans.size_hint()
    }
}

impl<'a> ExactSizeIterator for ParamViews<'a> {}

/// Aggregates N independently shaped f32 buffers into one contiguous backing
/// allocation with a single shared residency state and file region, so the
/// whole parameter group moves between tiers in one transfer.
#[derive(Debug)]
pub struct FlatParam {
    handle: PagedTensor,
    spans: Vec<ParamSpan>,
}

impl FlatParam {
    /// Copies each constituent's elements into a freshly allocated flat
    /// buffer in declared order (`offset[i] = sum of sizes[0..i)`), records
    /// `path` at offset 0 as the file association, and optionally flushes
    /// immediately (synchronous write, buffer retained resident).
    ///
    /// Fails wholesale on an empty part list or mixed element types.
    pub fn new(parts: &[Tensor], path: impl AsRef<Path>, flush_immediately: bool) -> Result<Self> {
        ensure!(
            !parts.is_empty(),
            "flat parameter requires at least one constituent buffer"
        );
        let dtype = parts[0].dtype();
        for part in parts {
            ensure!(
                part.dtype() == dtype,
                "flat parameter constituents must share one element type, found {:?} and {:?}",
                dtype,
                part.dtype()
            );
        }
        ensure!(
            dtype == DType::F32,
            "flat parameter math surface requires f32 constituents"
        );

        let total: usize = parts.iter().map(Tensor::len).sum();
        let mut backing = Tensor::zeros(Shape::new([total]));
        let mut spans = Vec::with_capacity(parts.len());
        let mut cursor = 0usize;
        {
            let flat = backing.data_mut();
            for part in parts {
                let numel = part.len();
                flat[cursor..cursor + numel].copy_from_slice(part.data());
                spans.push(ParamSpan {
                    dims: part.shape().dims().to_vec(),
                    offset: cursor,
                    numel,
                });
                cursor += numel;
            }
        }

        let mut handle = PagedTensor::from_tensor(backing);
        handle.set_file_params(path, 0);
        if flush_immediately {
            handle.to_file(false)?;
        }
        Ok(FlatParam { handle, spans })
    }

    /// Number of constituents in declared order.
    pub fn num_parts(&self) -> usize {
        self.spans.len()
    }

    /// Total element count of the flat backing buffer.
    pub fn total_numel(&self) -> usize {
        self.handle.shape().num_elements()
    }

    /// Current residency of the whole aggregate.
    pub fn residency(&self) -> crate::paging::Residency {
        self.handle.residency()
    }

    /// Yields one shaped, non-owning view per constituent, in declared order,
    /// reloading the backing buffer from disk first when it is not resident.
    pub fn get_param_views(&mut self) -> Result<ParamViews<'_>> {
        self.handle.ensure_resident()?;
        let data = self.handle.resident()?.data();
        Ok(ParamViews {
            data,
            spans: self.spans.iter(),
        })
    }

    /// Flushes the backing buffer to the recorded file region without
    /// releasing it.
    pub fn to_file(&mut self) -> Result<()> {
        self.handle.to_file(false)
    }

    /// Flushes and drops the backing buffer, freeing memory.
    pub fn release_to_file(&mut self) -> Result<()> {
        self.handle.to_file(true)
    }

    /// Re-targets the aggregate's file region and discards the cached
    /// backing buffer.
    pub fn point_to_file(&mut self, path: impl AsRef<Path>, offset: u64) {
        self.handle.point_to_file(path, offset);
    }
}

impl PagedOps for FlatParam {
    fn ensure_resident(&mut self) -> Result<()> {
        self.handle.ensure_resident()
    }

    fn resident(&self) -> Result<&Tensor> {
        self.handle.resident()
    }

    fn resident_mut(&mut self) -> Result<&mut Tensor> {
        self.handle.resident_mut()
    }

    fn writeback(&mut self) -> Result<()> {
        self.handle.writeback()
    }

    fn accumulate_grad(&mut self, delta: &Tensor) -> Result<()> {
        self.handle.accumulate_grad(delta)
    }

    fn grad_tensor(&mut self) -> Result<Option<Tensor>> {
        self.handle.grad_tensor()
    }

    fn zero_grad(&mut self) -> Result<()> {
        self.handle.zero_grad()
    }
}
