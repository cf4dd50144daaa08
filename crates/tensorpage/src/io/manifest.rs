//! Sidecar index persisting caller-managed offset assignments.
//!
//! Page files themselves are headerless, so the mapping from logical name to
//! (file, offset, shape, dtype) lives only with the caller. The manifest
//! makes that mapping durable: a magic-tagged sidecar file holding a
//! bincode-serialized index, from which OnDisk handles can be minted again
//! in a later process.

use crate::paging::PagedTensor;
use crate::tensor::{DType, Shape};
use anyhow::{anyhow, bail, ensure, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"TPAGEIDX";
const VERSION: u32 = 1;

/// One recorded page: where a named buffer's bytes live and how to shape them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub data_path: String,
    pub offset: u64,
    pub dims: Vec<u64>,
    pub dtype_tag: u32,
}

#[derive(Serialize, Deserialize)]
struct ManifestIndex {
    entries: Vec<ManifestEntry>,
}

/// Durable name → page-region index for a set of offloaded handles.
pub struct PageManifest {
    entries: Vec<ManifestEntry>,
    by_name: HashMap<String, usize>,
}

impl PageManifest {
    pub fn new() -> Self {
        PageManifest {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Records a handle's file association under `name`. Fails if the handle
    /// has no association yet or the name is already taken.
    pub fn insert(&mut self, name: &str, handle: &PagedTensor) -> Result<()> {
        let (path, offset) = handle
            .file_params()
            .ok_or_else(|| anyhow!("handle '{}' has no file association to record", name))?;
        ensure!(
            !self.by_name.contains_key(name),
            "manifest already records a page named '{}'",
            name
        );
        let entry = ManifestEntry {
            name: name.to_string(),
            data_path: path.to_string_lossy().into_owned(),
            offset,
            dims: handle.shape().dims().iter().map(|&d| d as u64).collect(),
            dtype_tag: handle.dtype().tag(),
        };
        self.by_name.insert(name.to_string(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Mints an OnDisk handle for a named page; the next access loads it.
    pub fn open(&self, name: &str) -> Result<PagedTensor> {
        let entry = self
            .get(name)
            .ok_or_else(|| anyhow!("page '{}' not found in manifest", name))?;
        let dtype = DType::from_tag(entry.dtype_tag)
            .ok_or_else(|| anyhow!("unknown dtype tag {} for page '{}'", entry.dtype_tag, name))?;
        let dims = entry
            .dims
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| anyhow!("page '{}' dim overflow", name)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PagedTensor::on_file(
            Shape::new(dims),
            dtype,
            &entry.data_path,
            entry.offset,
        ))
    }

    /// Writes the index as a sidecar file: magic, version, length-prefixed
    /// bincode payload.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let index = ManifestIndex {
            entries: self.entries.clone(),
        };
        let index_bytes = bincode::serialize(&index)?;
        ensure!(
            index_bytes.len() <= u32::MAX as usize,
            "page manifest index too large"
        );

        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(index_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&index_bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a sidecar file written by [`PageManifest::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("invalid page manifest magic header");
        }

        let version = read_u32(&mut file)?;
        if version != VERSION {
            bail!("unsupported page manifest version {}", version);
        }

        let index_len = read_u32(&mut file)? as usize;
        let mut index_bytes = vec![0u8; index_len];
        file.read_exact(&mut index_bytes)?;
        let index: ManifestIndex = bincode::deserialize(&index_bytes)?;

        let mut by_name = HashMap::with_capacity(index.entries.len());
        for (i, entry) in index.entries.iter().enumerate() {
            by_name.insert(entry.name.clone(), i);
        }
        Ok(PageManifest {
            entries: index.entries,
            by_name,
        })
    }
}

impl Default for PageManifest {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
