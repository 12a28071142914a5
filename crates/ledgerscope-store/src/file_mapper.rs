//! Read-only memory mappings over append-only files.
//!
//! A [`MappedFile`] maps whatever the file holds at open time. Growth is
//! picked up by [`MappedFile::reload`], which remaps to the new length and
//! refuses to shrink: a file that got shorter while mapped is reported as
//! [`StoreError::Shrunk`] instead of silently dropping records readers may
//! still index into.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use ledgerscope_core::constants::TX_OFFSET_SIZE;
use ledgerscope_core::error::StoreError;
use ledgerscope_core::records::le_u64;

/// A file mapped read-only. Empty files hold no mapping.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    map: Option<Mmap>,
}

fn map_file(path: &Path) -> Result<Option<Mmap>, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let len = file.metadata().map_err(|e| StoreError::io(path, e))?.len();
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: store files are only ever appended to or replaced by rename;
    // bytes inside the mapped length are never rewritten while mapped.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| StoreError::io(path, e))?;
    Ok(Some(map))
}

impl MappedFile {
    /// Map an existing file, creating it empty if absent.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| StoreError::io(&path, e))?;
            tracing::debug!(path = %path.display(), "created empty store file");
        }
        let map = map_file(&path)?;
        Ok(Self { path, map })
    }

    /// Map an existing file. Returns `None` when it does not exist.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Option<Self>, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(None);
        }
        let map = map_file(&path)?;
        Ok(Some(Self { path, map }))
    }

    /// Re-check the file size and remap if it grew.
    ///
    /// Returns `true` if the mapping was extended.
    pub fn reload(&mut self) -> Result<bool, StoreError> {
        let new_len = fs::metadata(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?
            .len();
        let old_len = self.len();
        if new_len < old_len {
            return Err(StoreError::Shrunk {
                path: self.path.clone(),
                old: old_len,
                new: new_len,
            });
        }
        if new_len == old_len {
            return Ok(false);
        }
        self.map = map_file(&self.path)?;
        tracing::debug!(path = %self.path.display(), old_len, new_len, "remapped grown file");
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Bytes from `offset` to the end of the mapping, if `offset` is inside it.
    pub fn tail(&self, offset: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        self.as_bytes().get(start..)
    }

    /// Exactly `len` bytes at `offset`, if fully mapped.
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        self.as_bytes().get(start..start.checked_add(len)?)
    }
}

/// A mapped dense array of fixed-size records.
#[derive(Debug)]
pub struct FixedFile {
    file: MappedFile,
    stride: usize,
}

impl FixedFile {
    pub fn open_or_create(path: impl AsRef<Path>, stride: usize) -> Result<Self, StoreError> {
        let file = MappedFile::open_or_create(path)?;
        Self::from_mapped(file, stride)
    }

    pub fn open_existing(path: impl AsRef<Path>, stride: usize) -> Result<Option<Self>, StoreError> {
        MappedFile::open_existing(path)?
            .map(|file| Self::from_mapped(file, stride))
            .transpose()
    }

    fn from_mapped(file: MappedFile, stride: usize) -> Result<Self, StoreError> {
        let fixed = Self { file, stride };
        fixed.check_alignment()?;
        Ok(fixed)
    }

    fn check_alignment(&self) -> Result<(), StoreError> {
        if self.file.len() % self.stride as u64 != 0 {
            return Err(StoreError::Misaligned {
                path: self.file.path().to_path_buf(),
                len: self.file.len(),
                stride: self.stride,
            });
        }
        Ok(())
    }

    /// Remap after growth. A partially appended trailing record is an error.
    pub fn reload(&mut self) -> Result<bool, StoreError> {
        let grew = self.file.reload()?;
        self.check_alignment()?;
        Ok(grew)
    }

    pub fn count(&self) -> u64 {
        self.file.len() / self.stride as u64
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Record `index`, or `None` past the end.
    pub fn get(&self, index: u64) -> Option<&[u8]> {
        let offset = index.checked_mul(self.stride as u64)?;
        self.file.slice(offset, self.stride)
    }
}

/// Variable-length records addressed through a `u64` offset index.
///
/// Record `i` spans `index[i]..index[i + 1]`, the last one running to the end
/// of the data file.
#[derive(Debug)]
pub struct IndexedFile {
    data: MappedFile,
    index: FixedFile,
}

impl IndexedFile {
    /// Open `<stem>_data.dat` and `<stem>_index.dat` under `dir`.
    pub fn open_or_create(dir: impl AsRef<Path>, stem: &str) -> Result<Self, StoreError> {
        let (data_path, index_path) = Self::paths(dir.as_ref(), stem);
        Ok(Self {
            data: MappedFile::open_or_create(data_path)?,
            index: FixedFile::open_or_create(index_path, TX_OFFSET_SIZE)?,
        })
    }

    pub fn paths(dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
        (
            dir.join(format!("{stem}_data.dat")),
            dir.join(format!("{stem}_index.dat")),
        )
    }

    pub fn reload(&mut self) -> Result<bool, StoreError> {
        let data = self.data.reload()?;
        let index = self.index.reload()?;
        Ok(data || index)
    }

    pub fn count(&self) -> u64 {
        self.index.count()
    }

    fn offset(&self, index: u64) -> Option<u64> {
        self.index.get(index).map(|b| le_u64(b, 0))
    }

    /// Payload of record `index`; `Ok(None)` past the end.
    pub fn get(&self, index: u64) -> Result<Option<&[u8]>, StoreError> {
        let Some(start) = self.offset(index) else {
            return Ok(None);
        };
        let end = self.offset(index + 1).unwrap_or(self.data.len());
        if start > end || end > self.data.len() {
            return Err(StoreError::CorruptRecord {
                offset: start,
                reason: format!("record {index} spans {start}..{end} of {}", self.data.len()),
            });
        }
        Ok(self.data.slice(start, (end - start) as usize))
    }
}
