//! Byte-exact reads and writes of tensor payloads at file offsets.
//!
//! Page files are raw, headerless byte dumps in the buffer's native
//! in-memory layout: no endianness conversion, no shape or dtype metadata.
//! Several logical buffers may share one physical file through disjoint,
//! caller-managed offsets.

use crate::env;
use crate::tensor::Tensor;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Writes the tensor's raw payload starting at byte `offset` of `path`.
///
/// The file is created if absent and is never truncated beyond the written
/// region, so disjoint regions written by other handles survive.
pub fn write(tensor: &Tensor, path: impl AsRef<Path>, offset: u64) -> Result<()> {
    write_bytes(tensor.as_raw_bytes(), path, offset)
}

/// Reads exactly `dest`'s byte length from `path` at `offset`, overwriting
/// the payload in place. Fails on a short read; the destination contents are
/// undefined afterwards.
pub fn read(dest: &mut Tensor, path: impl AsRef<Path>, offset: u64) -> Result<()> {
    read_bytes(dest.as_raw_bytes_mut(), path, offset)
}

/// Slice-level write primitive behind [`write`].
pub fn write_bytes(bytes: &[u8], path: impl AsRef<Path>, offset: u64) -> Result<()> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open '{}' for writing", path.display()))?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {} bytes to '{}'", bytes.len(), path.display()))?;
    if env::fsync_enabled() {
        file.sync_all()
            .with_context(|| format!("failed to sync '{}'", path.display()))?;
    }
    Ok(())
}

/// Slice-level read primitive behind [`read`].
pub fn read_bytes(dest: &mut [u8], path: impl AsRef<Path>, offset: u64) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("failed to open '{}' for reading", path.display()))?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(dest).with_context(|| {
        format!(
            "short read: expected {} bytes at offset {} of '{}'",
            dest.len(),
            offset,
            path.display()
        )
    })?;
    Ok(())
}
