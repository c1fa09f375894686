//! SharedBuffer - scoped ownership of worker output memory
//!
//! Worker processes write algorithm output into named shared-memory
//! segments. The server maps each segment read-only for the lifetime of
//! one epoch; dropping the `SharedBuffer` releases the mapping exactly once.
//!
//! Locations are either file paths or POSIX segment names (`name` or
//! `/name`), which are resolved under `/dev/shm`.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{Result, ServerError};

/// Directory backing POSIX shared-memory segment names.
pub const SHM_DIR: &str = "/dev/shm";

enum Backing {
    /// Read-only mapping of a shared-memory segment
    Mapped(Mmap),
    /// Bytes produced in-process
    Owned(Vec<u8>),
}

/// Owned, read-only byte region published by a worker.
pub struct SharedBuffer {
    location: String,
    backing: Backing,
}

impl SharedBuffer {
    /// Map `size` bytes of the segment at `location`.
    ///
    /// Fails if the segment is missing or shorter than `size`.
    pub fn map(location: &str, size: usize) -> Result<Self> {
        let path = resolve_location(location);
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < size {
            return Err(ServerError::ResourceExhausted(format!(
                "segment '{}' holds {} bytes, {} requested",
                location, file_len, size
            )));
        }

        // SAFETY: the segment is only written by its worker before it is
        // published; the server never writes through this mapping.
        let mmap = unsafe { MmapOptions::new().len(size).map(&file) }?;
        tracing::trace!(location, size, "mapped shared buffer");

        Ok(Self {
            location: location.to_string(),
            backing: Backing::Mapped(mmap),
        })
    }

    /// Wrap bytes that were produced in-process.
    pub fn from_vec(location: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            location: location.into(),
            backing: Backing::Owned(bytes),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(m) => m,
            Backing::Owned(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        tracing::trace!(location = %self.location, len = self.len(), "released shared buffer");
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("location", &self.location)
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// `name` and `/name` are segment names; anything with a directory is a path.
fn resolve_location(location: &str) -> PathBuf {
    let name = location.strip_prefix('/').unwrap_or(location);
    if name.contains('/') {
        PathBuf::from(location)
    } else {
        Path::new(SHM_DIR).join(name)
    }
}
