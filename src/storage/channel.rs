//! Random-access file node store

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::storage::{NodeStore, HEADER_SIZE};
use crate::{Result, TreeError};

/// Node store backed by a random-access file.
///
/// One store instance exclusively owns its file handle. `allocate` extends
/// the file length; a file written by a previous instance can be reattached
/// with [`ChannelNodeStore::open`], after which the tree validates the
/// header before trusting any node read.
#[derive(Debug)]
pub struct ChannelNodeStore {
    file: Mutex<File>,
    path: PathBuf,
    len: AtomicU64,
    closed: AtomicBool,
}

impl ChannelNodeStore {
    /// Create a new store file, truncating any existing one. The header
    /// slot is pre-allocated and zeroed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(HEADER_SIZE)?;

        Ok(Self {
            file: Mutex::new(file),
            path,
            len: AtomicU64::new(HEADER_SIZE),
            closed: AtomicBool::new(false),
        })
    }

    /// Attach to an existing store file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            return Err(TreeError::Corruption(format!(
                "store file {} is smaller than the header slot ({} bytes)",
                path.display(),
                len
            )));
        }

        Ok(Self {
            file: Mutex::new(file),
            path,
            len: AtomicU64::new(len),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TreeError::Closed);
        }
        Ok(())
    }
}

impl NodeStore for ChannelNodeStore {
    fn read_node(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        if offset + buf.len() as u64 > self.len.load(Ordering::SeqCst) {
            return Err(TreeError::Corruption(format!(
                "read of {} bytes at offset {} beyond extent {}",
                buf.len(),
                offset,
                self.len.load(Ordering::SeqCst)
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(|e| TreeError::IoAt {
            op: "node read seek",
            offset,
            source: e,
        })?;
        file.read_exact(buf).map_err(|e| TreeError::IoAt {
            op: "node read",
            offset,
            source: e,
        })
    }

    fn write_node(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if offset + buf.len() as u64 > self.len.load(Ordering::SeqCst) {
            return Err(TreeError::InvalidArgument(format!(
                "write of {} bytes at offset {} beyond extent {}",
                buf.len(),
                offset,
                self.len.load(Ordering::SeqCst)
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset)).map_err(|e| TreeError::IoAt {
            op: "node write seek",
            offset,
            source: e,
        })?;
        file.write_all(buf).map_err(|e| TreeError::IoAt {
            op: "node write",
            offset,
            source: e,
        })
    }

    fn allocate(&self, len: u64) -> Result<u64> {
        self.ensure_open()?;
        let file = self.file.lock();
        let offset = self.len.load(Ordering::SeqCst);
        file.set_len(offset + len).map_err(|e| TreeError::IoAt {
            op: "allocate",
            offset,
            source: e,
        })?;
        self.len.store(offset + len, Ordering::SeqCst);
        Ok(offset)
    }

    fn extent(&self) -> u64 {
        self.len.load(Ordering::SeqCst)
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.file.lock().sync_all()?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
