// Shared File I/O Pool for managing segment file handles
//
// Provides LRU caching for file handles when working with multi-segment
// EWF images to avoid exceeding OS file descriptor limits.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::ewf::{EwfError, EwfResult};

/// Default maximum number of simultaneously open file handles
pub const DEFAULT_MAX_OPEN_FILES: usize = 16;

// =============================================================================
// File I/O Pool - Like libbfio_pool
// =============================================================================

/// Manages multiple file handles with LRU caching
/// Limits number of simultaneously open files to avoid OS limits
pub struct FileIoPool {
    /// Paths to all segment files, indexed by pool entry
    file_paths: Vec<PathBuf>,
    /// Currently open file handles (entry -> File)
    open_handles: HashMap<usize, File>,
    /// LRU queue for file handle management
    lru_queue: VecDeque<usize>,
    /// Maximum number of simultaneously open files
    max_open: usize,
}

impl FileIoPool {
    /// Create a new file pool with specified paths and max open limit
    pub fn new(file_paths: Vec<PathBuf>, max_open: usize) -> Self {
        Self {
            file_paths,
            open_handles: HashMap::new(),
            lru_queue: VecDeque::new(),
            max_open: max_open.max(1),
        }
    }

    /// Create a new file pool with default max open limit
    pub fn with_default_limit(file_paths: Vec<PathBuf>) -> Self {
        Self::new(file_paths, DEFAULT_MAX_OPEN_FILES)
    }

    /// A pool over the same paths with no open handles, for use on another thread
    pub fn reopen(&self) -> Self {
        Self::new(self.file_paths.clone(), self.max_open)
    }

    /// Register another file and return its pool entry
    pub fn add_path(&mut self, path: impl AsRef<Path>) -> usize {
        self.file_paths.push(path.as_ref().to_path_buf());
        self.file_paths.len() - 1
    }

    /// Get a file handle, opening it if necessary and managing LRU cache
    pub fn get_file(&mut self, entry: usize) -> EwfResult<&mut File> {
        if entry >= self.file_paths.len() {
            return Err(EwfError::out_of_range(
                "io_pool::get_file",
                format!("entry {} out of range (have {} files)", entry, self.file_paths.len()),
            ));
        }

        if self.open_handles.contains_key(&entry) {
            self.lru_queue.retain(|&x| x != entry);
            self.lru_queue.push_front(entry);
            trace!(entry, "File handle cache hit");
        } else {
            if self.open_handles.len() >= self.max_open {
                if let Some(lru_entry) = self.lru_queue.pop_back() {
                    trace!(lru_entry, "Evicting LRU file handle");
                    self.open_handles.remove(&lru_entry);
                }
            }

            let file_path = &self.file_paths[entry];
            debug!(entry, ?file_path, "Opening file handle");
            let file = File::open(file_path).map_err(|e| EwfError::io("io_pool::get_file", e))?;

            self.open_handles.insert(entry, file);
            self.lru_queue.push_front(entry);
        }

        self.open_handles.get_mut(&entry).ok_or_else(|| {
            EwfError::out_of_range("io_pool::get_file", format!("entry {} not open", entry))
        })
    }

    /// Read up to `buffer.len()` bytes at `offset`; returns the number of bytes read.
    /// A short count means end of file was reached.
    pub fn read_at(&mut self, entry: usize, buffer: &mut [u8], offset: u64) -> EwfResult<usize> {
        let file = self.get_file(entry)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| EwfError::io("io_pool::read_at", e))?;

        let mut total = 0;
        while total < buffer.len() {
            match file.read(&mut buffer[total..]) {
                Ok(0) => break,
                Ok(count) => total += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(EwfError::io("io_pool::read_at", e)),
            }
        }
        trace!(entry, offset, requested = buffer.len(), read = total, "Pool read");
        Ok(total)
    }

    /// Fill `buffer` completely from `offset` or fail with an I/O error
    pub fn read_exact_at(&mut self, entry: usize, buffer: &mut [u8], offset: u64) -> EwfResult<()> {
        let count = self.read_at(entry, buffer, offset)?;
        if count != buffer.len() {
            return Err(EwfError::io(
                "io_pool::read_exact_at",
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "short read at offset {} of entry {}: {} of {} bytes",
                        offset,
                        entry,
                        count,
                        buffer.len()
                    ),
                ),
            ));
        }
        Ok(())
    }

    /// Size in bytes of the file behind an entry
    pub fn get_size(&mut self, entry: usize) -> EwfResult<u64> {
        let file = self.get_file(entry)?;
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| EwfError::io("io_pool::get_size", e))
    }

    /// Get the number of files in the pool
    pub fn get_file_count(&self) -> usize {
        self.file_paths.len()
    }

    /// Get the path for a specific entry
    pub fn get_path(&self, entry: usize) -> Option<&PathBuf> {
        self.file_paths.get(entry)
    }

    /// Get the number of currently open handles
    pub fn open_count(&self) -> usize {
        self.open_handles.len()
    }

    /// Close all open file handles
    pub fn close_all(&mut self) {
        self.open_handles.clear();
        self.lru_queue.clear();
    }
}
