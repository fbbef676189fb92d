//! Shared memory segment backing the blob transport.
//!
//! A segment is a file named after the connection's correlation id in the
//! shared memory directory, mapped read-write by both the client and the
//! provider. Whichever side sends a blob first makes sure the file is large
//! enough (it never shrinks), copies the bytes in and announces the
//! shared-memory selector; the receiver maps the file if its own mapping is
//! missing or too small and copies the bytes out.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, trace};

/// Segment files grow in multiples of this many bytes.
const SEGMENT_ALIGN: usize = 4096;

struct Mapping {
    _file: File,
    mmap: MmapMut,
}

/// One shared memory segment, mapped lazily.
pub struct SharedSegment {
    path: PathBuf,
    map: Option<Mapping>,
}

impl SharedSegment {
    /// Creates an unmapped handle for the segment at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes currently mapped, `0` when unmapped.
    pub fn capacity(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.mmap.len())
    }

    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    /// A segment is ready for `len` bytes when its mapping holds at least
    /// that many.
    pub fn is_ready(&self, len: usize) -> bool {
        self.is_mapped() && self.capacity() >= len
    }

    /// Creates or grows the backing file so it holds `len` bytes, then maps
    /// it. A no-op when the segment is already ready.
    pub fn prepare(&mut self, len: usize) -> io::Result<()> {
        if self.is_ready(len) {
            return Ok(());
        }
        let wanted = round_up(len.max(1)) as u64;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        if file.metadata()?.len() < wanted {
            file.set_len(wanted)?;
        }
        debug!(path = %self.path.display(), capacity = wanted, "Growing shared segment");
        self.remap(file)
    }

    /// Maps a segment the peer has already filled with `len` bytes,
    /// remapping when the current mapping is too small.
    pub fn attach(&mut self, len: usize) -> io::Result<()> {
        if self.is_ready(len) {
            return Ok(());
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let size = file.metadata()?.len();
        if size < len as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("segment holds {size} bytes, peer announced {len}"),
            ));
        }
        trace!(path = %self.path.display(), size, "Attaching shared segment");
        self.remap(file)
    }

    fn remap(&mut self, file: File) -> io::Result<()> {
        // Unmap before mapping again so a grown file is never mapped twice.
        self.map = None;
        // SAFETY: the file is only written by the two ends of one
        // connection, and the request/response protocol guarantees they
        // never touch it at the same time.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        self.map = Some(Mapping { _file: file, mmap });
        Ok(())
    }

    /// Copies `bytes` to the start of the segment. The segment must have
    /// been prepared for at least `bytes.len()`.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let map = self
            .map
            .as_mut()
            .filter(|m| m.mmap.len() >= bytes.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "segment not prepared"))?;
        map.mmap[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// First `len` bytes of the mapping, if that many are mapped.
    pub fn bytes(&self, len: usize) -> Option<&[u8]> {
        self.map
            .as_ref()
            .and_then(|m| m.mmap.get(..len))
    }

    /// Drops the mapping, keeping the file.
    pub fn release(&mut self) {
        self.map = None;
    }

    /// Drops the mapping and removes the file. Missing files are fine.
    pub fn unlink(&mut self) -> io::Result<()> {
        self.release();
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("path", &self.path)
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn round_up(len: usize) -> usize {
    len.div_ceil(SEGMENT_ALIGN).saturating_mul(SEGMENT_ALIGN)
}
