//! Incrementally filled arena whose slots graduate into pageable handles.

use crate::io::block;
use crate::paging::flat::{ParamSpan, ParamView};
use crate::paging::handle::{FileParams, PagedTensor};
use crate::tensor::{DType, Shape, Tensor};
use anyhow::{bail, ensure, Result};
use std::path::Path;

/// Fixed-capacity f32 arena that accepts tensors one at a time, persists the
/// used prefix in a single transfer, and afterwards mints an independent
/// [`PagedTensor`] per slot pointing at that slot's file region.
#[derive(Debug)]
pub struct PagedBuffer {
    storage: Option<Tensor>,
    capacity: usize,
    used: usize,
    spans: Vec<ParamSpan>,
    file: Option<FileParams>,
}

impl PagedBuffer {
    /// Preallocates a zeroed arena of `capacity` f32 elements.
    pub fn new(capacity: usize) -> Self {
        PagedBuffer {
            storage: Some(Tensor::zeros(Shape::new([capacity]))),
            capacity,
            used: 0,
            spans: Vec::new(),
            file: None,
        }
    }

    /// Arena capacity in elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements consumed by inserted tensors so far.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of inserted slots.
    pub fn num_slots(&self) -> usize {
        self.spans.len()
    }

    /// Whether `numel` more elements fit while the arena is still in memory.
    pub fn can_alloc(&self, numel: usize) -> bool {
        self.storage.is_some() && self.used + numel <= self.capacity
    }

    /// Copies `part` into the next free span and returns its slot id.
    pub fn insert(&mut self, part: &Tensor) -> Result<usize> {
        ensure!(
            part.dtype() == DType::F32,
            "paged buffer slots must be f32, got {:?}",
            part.dtype()
        );
        let numel = part.len();
        ensure!(
            self.used + numel <= self.capacity,
            "paged buffer capacity exhausted: {} elements used of {}, {} requested",
            self.used,
            self.capacity,
            numel
        );
        let storage = match self.storage.as_mut() {
            Some(storage) => storage,
            None => bail!("paged buffer has been moved to disk; call from_disk first"),
        };
        let offset = self.used;
        storage.data_mut()[offset..offset + numel].copy_from_slice(part.data());
        self.spans.push(ParamSpan {
            dims: part.shape().dims().to_vec(),
            offset,
            numel,
        });
        self.used += numel;
        Ok(self.spans.len() - 1)
    }

    /// Reconstructs a shaped view of a slot from the in-memory arena.
    pub fn view(&self, slot: usize) -> Result<ParamView<'_>> {
        let storage = match self.storage.as_ref() {
            Some(storage) => storage,
            None => bail!("paged buffer has been moved to disk; call from_disk first"),
        };
        let span = match self.spans.get(slot) {
            Some(span) => span,
            None => bail!("unknown paged buffer slot {}", slot),
        };
        Ok(ParamView {
            dims: &span.dims,
            data: &storage.data()[span.offset..span.offset + span.numel],
        })
    }

    /// Persists the used prefix of the arena at `offset` of `path` in one
    /// transfer and frees the in-memory storage.
    pub fn to_disk(&mut self, path: impl AsRef<Path>, offset: u64) -> Result<()> {
        let storage = match self.storage.as_ref() {
            Some(storage) => storage,
            None => bail!("paged buffer is already on disk"),
        };
        let byte_len = self.used * DType::F32.size_in_bytes();
        block::write_bytes(&storage.as_raw_bytes()[..byte_len], &path, offset)?;
        self.file = Some(FileParams {
            path: path.as_ref().to_path_buf(),
            offset,
        });
        self.storage = None;
        Ok(())
    }

    /// Rehydrates the used prefix from the recorded file region. No I/O when
    /// the arena is still in memory.
    pub fn from_disk(&mut self) -> Result<()> {
        if self.storage.is_some() {
            return Ok(());
        }
        let file = match self.file.as_ref() {
            Some(file) => file.clone(),
            None => bail!("paged buffer has no file region recorded"),
        };
        let mut fresh = Tensor::zeros(Shape::new([self.capacity]));
        let byte_len = self.used * DType::F32.size_in_bytes();
        block::read_bytes(&mut fresh.as_raw_bytes_mut()[..byte_len], &file.path, file.offset)?;
        self.storage = Some(fresh);
        Ok(())
    }

    /// Mints an independent handle for a slot, pointing at the slot's region
    /// of the persisted arena. Only valid after `to_disk` has recorded where
    /// the arena lives.
    pub fn handle(&self, slot: usize) -> Result<PagedTensor> {
        let file = match self.file.as_ref() {
            Some(file) => file,
            None => bail!("paged buffer slots graduate to handles only after to_disk"),
        };
        let span = match self.spans.get(slot) {
            Some(span) => span,
            None => bail!("unknown paged buffer slot {}", slot),
        };
        let byte_offset = file.offset + (span.offset * DType::F32.size_in_bytes()) as u64;
        Ok(PagedTensor::on_file(
            Shape::new(span.dims.clone()),
            DType::F32,
            &file.path,
            byte_offset,
        ))
    }
}
