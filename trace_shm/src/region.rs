//! Mapped shared-memory regions

use crate::error::{ShmError, ShmResult};
use crate::platform::{anonymous_mmap, attach_segment_mmap, create_segment_mmap};
use memmap2::MmapMut;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use trace_common::consts::CACHE_LINE_SIZE;
use tracing::{debug, warn};

/// Shared handle to a mapped region.
pub type ResourcePointer = Arc<ShmRegion>;

/// Permissions of trace shared-memory objects; the daemon runs as another user.
pub const SHM_OBJECT_MODE: u32 = 0o666;

/// A contiguous mapping that can be shared between processes.
///
/// The region hands out raw pointers through `&self`: concurrent writers
/// must partition it (allocator) or use atomics (ring buffer).
pub struct ShmRegion {
    base: NonNull<u8>,
    size: usize,
    path: Option<PathBuf>,
    _mmap: MmapMut,
}

// SAFETY: `base` points into `_mmap`, which lives as long as the region and
// is never remapped. All mutation through `base` goes through atomics or
// through allocator-partitioned, exclusively owned ranges.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create (or truncate) the object at `path` with `size` zeroed bytes.
    pub fn create(path: &Path, size: usize) -> ShmResult<Self> {
        if size == 0 {
            return Err(ShmError::InvalidSize { size });
        }
        let mmap = create_segment_mmap(path, size, SHM_OBJECT_MODE, true)?;
        debug!("Created shm region {} ({} bytes)", path.display(), size);
        Self::from_mmap(mmap, Some(path.to_path_buf()))
    }

    /// Map an existing object.
    pub fn open(path: &Path) -> ShmResult<Self> {
        let mmap = attach_segment_mmap(path)?;
        debug!("Opened shm region {} ({} bytes)", path.display(), mmap.len());
        Self::from_mmap(mmap, Some(path.to_path_buf()))
    }

    /// Map `size` zeroed bytes visible only to this process.
    pub fn anonymous(size: usize) -> ShmResult<Self> {
        if size == 0 {
            return Err(ShmError::InvalidSize { size });
        }
        let mmap = anonymous_mmap(size)?;
        Self::from_mmap(mmap, None)
    }

    /// Unlink the object at `path`. A missing object is not an error.
    pub fn remove(path: &Path) -> ShmResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed shm region {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove shm region {}: {}", path.display(), e);
                Err(ShmError::from_io(e, &path.display().to_string()))
            }
        }
    }

    fn from_mmap(mut mmap: MmapMut, path: Option<PathBuf>) -> ShmResult<Self> {
        let size = mmap.len();
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(ShmError::InvalidSize { size })?;
        let address = base.as_ptr() as usize;
        if address % CACHE_LINE_SIZE != 0 {
            return Err(ShmError::AlignmentError {
                address,
                alignment: CACHE_LINE_SIZE,
            });
        }
        Ok(Self {
            base,
            size,
            path,
            _mmap: mmap,
        })
    }

    /// First byte of the mapping.
    #[inline]
    pub fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Backing object path, `None` for anonymous regions.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `[ptr, ptr + len)` lies inside the mapping.
    pub fn contains(&self, ptr: *const u8, len: usize) -> bool {
        self.offset_of(ptr)
            .and_then(|offset| offset.checked_add(len))
            .is_some_and(|end| end <= self.size)
    }

    /// Offset of `ptr` from the base, if it points into the mapping.
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let base = self.base.as_ptr() as usize;
        let address = ptr as usize;
        if address < base {
            return None;
        }
        let offset = address - base;
        (offset < self.size).then_some(offset)
    }
}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("path", &self.path)
            .finish()
    }
}
