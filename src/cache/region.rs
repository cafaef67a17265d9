//! Memory-Mapped Regions
//!
//! Shared file mappings used for the index, the content store and the miss
//! bus. Several processes map the same file, so every access goes through
//! raw pointers with explicit bounds checks rather than through `&[u8]`
//! views that would assume nobody else writes the bytes.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use memmap2::{MmapOptions, MmapRaw};
use tracing::info;

use crate::error::{Error, Result};

/// A file mapped read/write into this process
#[derive(Debug)]
pub struct MappedRegion {
    map: MmapRaw,
    path: PathBuf,
}

impl MappedRegion {
    /// Map `path`, creating the file and growing it to `size` bytes if needed.
    ///
    /// An existing larger file is mapped only up to `size`.
    pub fn open(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if size == 0 {
            return Err(Error::Config(format!(
                "region {:?}: size should be positive",
                path
            )));
        }
        let len = usize::try_from(size)
            .map_err(|_| Error::Config(format!("region {:?}: size {} too large", path, size)))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.metadata()?.len() < size {
            file.set_len(size)?;
        }

        let map = MmapOptions::new().len(len).map_raw(&file)?;
        info!(path = ?path, size, "mapped region");

        Ok(Self { map, path })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped length in bytes
    #[inline]
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    /// Check if the mapping is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Fail with `RegionTooSmall` unless the mapping holds `required` bytes
    pub fn ensure_len(&self, required: u64) -> Result<()> {
        if self.len() < required {
            return Err(Error::RegionTooSmall {
                path: self.path.clone(),
                required,
                actual: self.len(),
            });
        }
        Ok(())
    }

    /// Start of `[offset, offset + len)` if that range lies inside the mapping
    #[inline]
    fn range(&self, offset: u64, len: usize) -> Option<usize> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.map.len()).then_some(start)
    }

    /// Check whether `[offset, offset + len)` lies inside the mapping
    #[inline]
    pub fn contains(&self, offset: u64, len: usize) -> bool {
        self.range(offset, len).is_some()
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    #[inline]
    pub fn read_into(&self, offset: u64, buf: &mut [u8]) -> Option<()> {
        let start = self.range(offset, buf.len())?;
        // SAFETY: the range was bounds-checked against the live mapping and
        // `buf` is a distinct local buffer.
        unsafe {
            ptr::copy_nonoverlapping(self.map.as_ptr().add(start), buf.as_mut_ptr(), buf.len());
        }
        Some(())
    }

    /// Copy `len` bytes starting at `offset` into a new buffer
    pub fn read_vec(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.read_into(offset, &mut out)?;
        Some(out)
    }

    /// Read one byte
    #[inline]
    pub fn read_u8(&self, offset: u64) -> Option<u8> {
        let mut b = [0u8; 1];
        self.read_into(offset, &mut b)?;
        Some(b[0])
    }

    /// Read a big-endian u32
    #[inline]
    pub fn read_u32_be(&self, offset: u64) -> Option<u32> {
        let mut b = [0u8; 4];
        self.read_into(offset, &mut b)?;
        Some(u32::from_be_bytes(b))
    }

    /// Read a big-endian u64
    #[inline]
    pub fn read_u64_be(&self, offset: u64) -> Option<u64> {
        let mut b = [0u8; 8];
        self.read_into(offset, &mut b)?;
        Some(u64::from_be_bytes(b))
    }

    /// Copy `data` into the mapping at `offset`
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Option<()> {
        let start = self.range(offset, data.len())?;
        // SAFETY: bounds-checked; MmapRaw hands out a mutable pointer for
        // exactly this kind of shared write.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.map.as_mut_ptr().add(start), data.len());
        }
        Some(())
    }

    /// Fill `[offset, offset + len)` with zeros
    pub fn zero(&self, offset: u64, len: usize) -> Option<()> {
        let start = self.range(offset, len)?;
        // SAFETY: bounds-checked as above.
        unsafe {
            ptr::write_bytes(self.map.as_mut_ptr().add(start), 0, len);
        }
        Some(())
    }

    /// Atomic view of the u16 at `offset`; `None` if out of range or misaligned
    pub fn atomic_u16(&self, offset: u64) -> Option<&AtomicU16> {
        let start = self.aligned(offset, std::mem::size_of::<AtomicU16>())?;
        // SAFETY: in range, aligned for AtomicU16, and the mapping outlives
        // the returned reference.
        Some(unsafe { &*(self.map.as_mut_ptr().add(start) as *const AtomicU16) })
    }

    /// Atomic view of the u32 at `offset`; `None` if out of range or misaligned
    pub fn atomic_u32(&self, offset: u64) -> Option<&AtomicU32> {
        let start = self.aligned(offset, std::mem::size_of::<AtomicU32>())?;
        // SAFETY: see `atomic_u16`.
        Some(unsafe { &*(self.map.as_mut_ptr().add(start) as *const AtomicU32) })
    }

    /// Atomic view of the u64 at `offset`; `None` if out of range or misaligned
    pub fn atomic_u64(&self, offset: u64) -> Option<&AtomicU64> {
        let start = self.aligned(offset, std::mem::size_of::<AtomicU64>())?;
        // SAFETY: see `atomic_u16`.
        Some(unsafe { &*(self.map.as_mut_ptr().add(start) as *const AtomicU64) })
    }

    fn aligned(&self, offset: u64, width: usize) -> Option<usize> {
        let start = self.range(offset, width)?;
        let addr = self.map.as_ptr() as usize + start;
        (addr % width == 0).then_some(start)
    }

    /// Add one to the native-order u32 counter at `offset`, returning the new value.
    ///
    /// Aligned counters use a fetch-and-add. A counter at an odd offset that
    /// still sits inside one aligned 8-byte word is bumped with a CAS loop on
    /// that word. Only a counter straddling two words falls back to a plain
    /// load/store, where concurrent touches may be lost.
    pub fn bump_u32(&self, offset: u64) -> Option<u32> {
        if let Some(counter) = self.atomic_u32(offset) {
            return Some(counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
        }
        if let Some(next) = self.bump_u32_in_word(offset) {
            return Some(next);
        }
        let start = self.range(offset, 4)?;
        // SAFETY: bounds-checked; unaligned access is done through the
        // unaligned read/write primitives.
        unsafe {
            let p = self.map.as_mut_ptr().add(start) as *mut u32;
            let next = ptr::read_unaligned(p).wrapping_add(1);
            ptr::write_unaligned(p, next);
            Some(next)
        }
    }

    fn bump_u32_in_word(&self, offset: u64) -> Option<u32> {
        let start = self.range(offset, 4)?;
        let addr = self.map.as_ptr() as usize + start;
        let within = (addr % 8) as u64;
        if within > 4 {
            return None;
        }
        let word = self.atomic_u64(offset - within)?;

        // Bit position of the counter inside the native-order word.
        let shift = if cfg!(target_endian = "little") {
            8 * within
        } else {
            8 * (4 - within)
        };
        let mask = 0xFFFF_FFFFu64 << shift;

        let mut current = word.load(Ordering::Relaxed);
        loop {
            let next = (((current & mask) >> shift) as u32).wrapping_add(1);
            let updated = (current & !mask) | ((next as u64) << shift);
            match word.compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Load the native-order u32 counter at `offset`
    pub fn load_u32(&self, offset: u64) -> Option<u32> {
        if let Some(counter) = self.atomic_u32(offset) {
            return Some(counter.load(Ordering::Relaxed));
        }
        let mut b = [0u8; 4];
        self.read_into(offset, &mut b)?;
        Some(u32::from_ne_bytes(b))
    }

    /// Flush outstanding writes to the backing file
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
