//! Growable memory-mapped file with a persisted append cursor.
//!
//! Every mapped file starts with an 8-byte little-endian header holding the
//! committed append offset. All offsets accepted by [`MappedStorage`] are
//! logical, i.e. relative to the end of that header:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────────────────┐
//! │ append offset (8B) │ data [0 .. append offset) | free capacity │
//! └────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! Growth remaps the file. Because [`MappedStorage::ensure_capacity`] takes
//! `&mut self`, the borrow checker guarantees that no slice handed out by
//! [`MappedStorage::bytes`] survives a remap; callers re-fetch after writes.

use crate::error::{JournalError, Result};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, trace};

/// Size of the append offset header at the start of every mapped file.
pub const HEADER_SIZE: u64 = 8;

/// Smallest growth increment (4 KiB).
pub const MIN_BIT_HINT: u32 = 12;

/// Largest growth increment (1 GiB).
pub const MAX_BIT_HINT: u32 = 30;

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-only access; missing files read as empty.
    Read,
    /// Read-write access; files are created on demand.
    #[default]
    Append,
}

/// Returns the power-of-two growth increment able to hold `record_count`
/// records of `record_size` bytes, clamped to `[MIN_BIT_HINT, MAX_BIT_HINT]`.
pub fn bit_hint(record_size: usize, record_count: u64) -> u32 {
    let bytes = (record_size as u64).saturating_mul(record_count.max(1));
    let bits = 64 - bytes.saturating_sub(1).leading_zeros();
    bits.clamp(MIN_BIT_HINT, MAX_BIT_HINT)
}

fn round_up(value: u64, increment: u64) -> u64 {
    value.div_ceil(increment) * increment
}

enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Region {
    fn as_slice(&self) -> &[u8] {
        match self {
            Region::ReadOnly(map) => &map[..],
            Region::ReadWrite(map) => &map[..],
        }
    }
}

/// A file-backed memory region with a logical append cursor.
pub struct MappedStorage {
    path: PathBuf,
    file: Option<File>,
    mode: AccessMode,
    region: Option<Region>,
    mapped_size: u64,
    append_offset: u64,
    increment: u64,
}

impl std::fmt::Debug for MappedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedStorage")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("mapped_size", &self.mapped_size)
            .field("append_offset", &self.append_offset)
            .finish()
    }
}

impl MappedStorage {
    /// Opens (or, in append mode, creates) a mapped file.
    ///
    /// `bit_hint` selects the growth increment as `1 << bit_hint` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, sized or mapped.
    pub fn open(path: impl AsRef<Path>, bit_hint: u32, mode: AccessMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let increment = 1u64 << bit_hint.clamp(MIN_BIT_HINT, MAX_BIT_HINT);

        let mut storage = Self {
            path,
            file: None,
            mode,
            region: None,
            mapped_size: 0,
            append_offset: 0,
            increment,
        };

        match mode {
            AccessMode::Append => storage.open_for_append()?,
            AccessMode::Read => storage.open_for_read()?,
        }

        trace!(
            "Mapped {} [size={}, append_offset={}]",
            storage.path.display(),
            storage.mapped_size,
            storage.append_offset
        );
        Ok(storage)
    }

    fn open_for_append(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let len = file.metadata()?.len();
        let fresh = len < HEADER_SIZE;
        if fresh {
            let size = self.increment.max(HEADER_SIZE);
            file.set_len(size)
                .map_err(|source| JournalError::StorageGrowth {
                    path: self.path.clone(),
                    requested: size,
                    source,
                })?;
        }

        // SAFETY: the file is opened read-write by the single writer of this
        // storage instance; the mapping lives as long as `self` and every
        // access goes through bounds-checked slices.
        let map = unsafe { MmapMut::map_mut(&file)? };
        self.mapped_size = map.len() as u64;
        self.region = Some(Region::ReadWrite(map));
        self.file = Some(file);

        if fresh {
            self.write_header(0)?;
        } else {
            self.append_offset = self.read_header()?;
        }
        Ok(())
    }

    fn open_for_read(&mut self) -> Result<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        self.file = Some(file);
        self.remap_read_only()
    }

    fn remap_read_only(&mut self) -> Result<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            self.region = None;
            self.mapped_size = 0;
            self.append_offset = 0;
            return Ok(());
        }
        // SAFETY: read-only mapping of a file that is only ever appended to by
        // its writer; stale pages are refreshed by `refresh`.
        let map = unsafe { Mmap::map(file)? };
        self.mapped_size = map.len() as u64;
        self.region = Some(Region::ReadOnly(map));
        self.append_offset = self.read_header()?;
        Ok(())
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the access mode.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Returns the committed logical append offset.
    pub fn append_offset(&self) -> u64 {
        self.append_offset
    }

    /// Returns the logical number of bytes currently addressable.
    pub fn capacity(&self) -> u64 {
        self.mapped_size.saturating_sub(HEADER_SIZE)
    }

    /// Sets and persists the append offset.
    ///
    /// # Errors
    ///
    /// Fails on read-only storage or if the offset cannot be mapped.
    pub fn set_append_offset(&mut self, offset: u64) -> Result<()> {
        self.ensure_capacity(offset)?;
        self.write_header(offset)?;
        self.append_offset = offset;
        Ok(())
    }

    /// Remaps the file so that logical range `[0, offset_needed)` is addressable.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ReadOnly`] in read mode and
    /// [`JournalError::StorageGrowth`] if the file cannot be extended.
    pub fn ensure_capacity(&mut self, offset_needed: u64) -> Result<()> {
        let needed = self.physical_end(offset_needed, 0)?;
        if needed <= self.mapped_size {
            return Ok(());
        }
        if self.mode == AccessMode::Read {
            return Err(JournalError::ReadOnly(self.path.clone()));
        }

        let new_size = round_up(needed.max(self.mapped_size.saturating_mul(2)), self.increment);
        if let Some(Region::ReadWrite(map)) = self.region.as_ref() {
            map.flush()?;
        }
        self.region = None;

        let file = self
            .file
            .as_ref()
            .ok_or_else(|| JournalError::ReadOnly(self.path.clone()))?;
        file.set_len(new_size)
            .map_err(|source| JournalError::StorageGrowth {
                path: self.path.clone(),
                requested: new_size,
                source,
            })?;

        // SAFETY: the previous mapping was dropped above and `&mut self`
        // guarantees no outstanding borrows into it.
        let map = unsafe { MmapMut::map_mut(file)? };
        debug!(
            "Remapped {} from {} to {} bytes",
            self.path.display(),
            self.mapped_size,
            new_size
        );
        self.mapped_size = map.len() as u64;
        self.region = Some(Region::ReadWrite(map));
        Ok(())
    }

    /// Returns `len` bytes at logical `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::OutOfBounds`] if the range is not mapped.
    pub fn bytes(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let end = self.physical_end(offset, len)?;
        let start = end - len as u64;
        match self.region.as_ref() {
            Some(region) if end <= self.mapped_size => {
                Ok(&region.as_slice()[start as usize..end as usize])
            }
            _ => Err(self.out_of_bounds(offset, len)),
        }
    }

    /// Returns a mutable view of `len` bytes at logical `offset`, growing the
    /// file first when needed.
    ///
    /// # Errors
    ///
    /// Fails on read-only storage or when growth fails.
    pub fn bytes_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        let end = self.physical_end(offset, len)?;
        self.ensure_capacity(end - HEADER_SIZE)?;
        let start = (end - len as u64) as usize;
        match self.region.as_mut() {
            Some(Region::ReadWrite(map)) => Ok(&mut map[start..start + len]),
            _ => Err(JournalError::ReadOnly(self.path.clone())),
        }
    }

    /// Reads a little-endian `i64`.
    pub fn read_i64(&self, offset: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(offset, 8)?);
        Ok(i64::from_le_bytes(buf))
    }

    /// Writes a little-endian `i64`.
    pub fn write_i64(&mut self, offset: u64, value: i64) -> Result<()> {
        self.bytes_mut(offset, 8)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&self, offset: u64) -> Result<i32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(offset, 4)?);
        Ok(i32::from_le_bytes(buf))
    }

    /// Writes a little-endian `i32`.
    pub fn write_i32(&mut self, offset: u64, value: i32) -> Result<()> {
        self.bytes_mut(offset, 4)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads a little-endian `i16`.
    pub fn read_i16(&self, offset: u64) -> Result<i16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.bytes(offset, 2)?);
        Ok(i16::from_le_bytes(buf))
    }

    /// Reads a single byte.
    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    /// Reads a little-endian `f64`.
    pub fn read_f64(&self, offset: u64) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64(offset)? as u64))
    }

    /// Writes a little-endian `f64`.
    pub fn write_f64(&mut self, offset: u64, value: f64) -> Result<()> {
        self.write_i64(offset, value.to_bits() as i64)
    }

    /// Reads a little-endian `f32`.
    pub fn read_f32(&self, offset: u64) -> Result<f32> {
        Ok(f32::from_bits(self.read_i32(offset)? as u32))
    }

    /// Copies `src` to logical `offset`.
    pub fn write_bytes(&mut self, offset: u64, src: &[u8]) -> Result<()> {
        self.bytes_mut(offset, src.len())?.copy_from_slice(src);
        Ok(())
    }

    /// Zero-fills `len` bytes at logical `offset`.
    pub fn fill_zero(&mut self, offset: u64, len: u64) -> Result<()> {
        self.bytes_mut(offset, len as usize)?.fill(0);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst` within the file.
    pub fn copy_within(&mut self, src: u64, dst: u64, len: u64) -> Result<()> {
        let len_bytes = usize::try_from(len).map_err(|_| self.out_of_bounds(src, usize::MAX))?;
        let end = self.physical_end(src.max(dst), len_bytes)?;
        self.ensure_capacity(end - HEADER_SIZE)?;
        let src_start = (src + HEADER_SIZE) as usize;
        let dst_start = (dst + HEADER_SIZE) as usize;
        match self.region.as_mut() {
            Some(Region::ReadWrite(map)) => {
                map.copy_within(src_start..src_start + len as usize, dst_start);
                Ok(())
            }
            _ => Err(JournalError::ReadOnly(self.path.clone())),
        }
    }

    /// Stores an `i64` with release ordering so that readers mapping the same
    /// file observe every write issued before it.
    pub fn publish_i64(&mut self, offset: u64, value: i64) -> Result<()> {
        let slot = self.bytes_mut(offset, 8)?;
        let ptr = slot.as_mut_ptr();
        if (ptr as usize) % std::mem::align_of::<AtomicI64>() != 0 {
            slot.copy_from_slice(&value.to_le_bytes());
            return Ok(());
        }
        // SAFETY: `ptr` is 8-byte aligned, points at 8 mapped writable bytes
        // exclusively borrowed through `slot`.
        let cell = unsafe { &*(ptr as *const AtomicI64) };
        cell.store(value.to_le(), Ordering::Release);
        Ok(())
    }

    /// Loads an `i64` with acquire ordering; pairs with [`Self::publish_i64`].
    pub fn load_i64(&self, offset: u64) -> Result<i64> {
        let slot = self.bytes(offset, 8)?;
        let ptr = slot.as_ptr();
        if (ptr as usize) % std::mem::align_of::<AtomicI64>() != 0 {
            return self.read_i64(offset);
        }
        // SAFETY: aligned pointer into 8 mapped bytes borrowed through `slot`.
        let cell = unsafe { &*(ptr as *const AtomicI64) };
        Ok(i64::from_le(cell.load(Ordering::Acquire)))
    }

    /// Re-reads file length and header. Used by readers to pick up data
    /// appended by the writer since the file was mapped.
    pub fn refresh(&mut self) -> Result<()> {
        match self.mode {
            AccessMode::Read => {
                if self.file.is_none() && self.path.exists() {
                    self.file = Some(File::open(&self.path)?);
                }
                self.remap_read_only()
            }
            AccessMode::Append => {
                self.append_offset = self.read_header()?;
                Ok(())
            }
        }
    }

    /// Flushes dirty pages to disk.
    pub fn force(&self) -> Result<()> {
        if let Some(Region::ReadWrite(map)) = self.region.as_ref() {
            map.flush()?;
        }
        Ok(())
    }

    /// Shrinks the file to the append offset rounded up to a 4 KiB page.
    /// Logical content is unchanged.
    pub fn compact(&mut self) -> Result<()> {
        self.compact_to(self.append_offset)
    }

    /// Like [`Self::compact`], but keeps at least `[0, keep)` so that data
    /// written by an open transaction beyond the committed append offset
    /// survives.
    pub fn compact_to(&mut self, keep: u64) -> Result<()> {
        if self.mode == AccessMode::Read {
            return Ok(());
        }
        let end = self.physical_end(keep.max(self.append_offset), 0)?;
        let target = round_up(end, 1 << MIN_BIT_HINT);
        if target >= self.mapped_size {
            return Ok(());
        }
        self.force()?;
        self.region = None;
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| JournalError::ReadOnly(self.path.clone()))?;
        file.set_len(target)?;
        // SAFETY: previous mapping dropped above; exclusive via `&mut self`.
        let map = unsafe { MmapMut::map_mut(file)? };
        debug!(
            "Compacted {} from {} to {} bytes",
            self.path.display(),
            self.mapped_size,
            target
        );
        self.mapped_size = map.len() as u64;
        self.region = Some(Region::ReadWrite(map));
        Ok(())
    }

    fn read_header(&self) -> Result<u64> {
        let region = self
            .region
            .as_ref()
            .ok_or_else(|| self.out_of_bounds(0, 8))?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&region.as_slice()[..HEADER_SIZE as usize]);
        let offset = u64::from_le_bytes(buf);
        Ok(offset.min(self.capacity()))
    }

    fn write_header(&mut self, offset: u64) -> Result<()> {
        match self.region.as_mut() {
            Some(Region::ReadWrite(map)) => {
                map[..HEADER_SIZE as usize].copy_from_slice(&offset.to_le_bytes());
                Ok(())
            }
            _ => Err(JournalError::ReadOnly(self.path.clone())),
        }
    }

    /// Physical end of logical range `[offset, offset + len)`.
    fn physical_end(&self, offset: u64, len: usize) -> Result<u64> {
        offset
            .checked_add(HEADER_SIZE)
            .and_then(|start| start.checked_add(len as u64))
            .ok_or_else(|| self.out_of_bounds(offset, len))
    }

    fn out_of_bounds(&self, offset: u64, len: usize) -> JournalError {
        JournalError::OutOfBounds {
            path: self.path.clone(),
            offset,
            len,
            size: self.capacity(),
        }
    }
}
