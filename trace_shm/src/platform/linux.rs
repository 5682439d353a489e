//! Linux shared-memory object handling
//!
//! Objects live as files under `/dev/shm` and are mapped with `memmap2`.

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::sys::stat::{Mode, fchmod};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Directory backing POSIX shared-memory objects.
pub const SHM_DIR: &str = "/dev/shm";

/// Path of the shared-memory object called `name`.
///
/// Absolute names are taken as they are.
pub fn shm_path(name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(SHM_DIR).join(name)
    }
}

/// Create (or truncate) the object at `path` and map `size` zeroed bytes.
///
/// `populate` pre-faults the pages so the first producer write does not
/// take a page fault.
pub fn create_segment_mmap(
    path: &Path,
    size: usize,
    mode: u32,
    populate: bool,
) -> ShmResult<MmapMut> {
    let display = path.display().to_string();
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(|e| ShmError::from_io(e, &display))?;
    // The creation mode is filtered by the umask.
    fchmod(&file, Mode::from_bits_truncate(mode))?;

    file.set_len(size as u64)?;

    let mut options = MmapOptions::new();
    if populate {
        options.populate();
    }

    // SAFETY: the file was just truncated and sized by us; other processes
    // only ever access it through the atomic protocols of this crate.
    let mmap = unsafe { options.map_mut(&file)? };
    Ok(mmap)
}

/// Map an existing object read-write, using its current length.
pub fn attach_segment_mmap(path: &Path) -> ShmResult<MmapMut> {
    let display = path.display().to_string();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| ShmError::from_io(e, &display))?;

    if file.metadata()?.len() == 0 {
        return Err(ShmError::Corrupted {
            name: display,
            reason: "empty object",
        });
    }

    // SAFETY: see `create_segment_mmap`.
    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Map `size` zeroed bytes private to this process.
pub fn anonymous_mmap(size: usize) -> ShmResult<MmapMut> {
    Ok(MmapOptions::new().len(size).map_anon()?)
}
