//! In-memory byte-buffer node store

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::storage::{NodeStore, HEADER_SIZE};
use crate::{Result, TreeError};

/// Node store backed by a growable byte buffer.
///
/// Useful for building a tree entirely in memory and extracting the final
/// byte image with [`MemoryNodeStore::into_bytes`], or for attaching to
/// bytes produced by a previous tree instance via
/// [`MemoryNodeStore::from_bytes`].
#[derive(Debug)]
pub struct MemoryNodeStore {
    buf: RwLock<Vec<u8>>,
    closed: AtomicBool,
}

impl MemoryNodeStore {
    /// Empty store with the header slot reserved.
    pub fn new() -> Self {
        Self {
            buf: RwLock::new(vec![0u8; HEADER_SIZE as usize]),
            closed: AtomicBool::new(false),
        }
    }

    /// Attach to a byte image written by a previous store instance.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if (bytes.len() as u64) < HEADER_SIZE {
            return Err(TreeError::Corruption(format!(
                "store image of {} bytes is smaller than the header slot",
                bytes.len()
            )));
        }
        Ok(Self {
            buf: RwLock::new(bytes),
            closed: AtomicBool::new(false),
        })
    }

    /// Consume the store and return the raw byte image.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_inner()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TreeError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryNodeStore {
    fn read_node(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        let data = self.buf.read();
        let end = offset as usize + buf.len();
        if end > data.len() {
            return Err(TreeError::Corruption(format!(
                "read of {} bytes at offset {} beyond extent {}",
                buf.len(),
                offset,
                data.len()
            )));
        }
        buf.copy_from_slice(&data[offset as usize..end]);
        Ok(())
    }

    fn write_node(&self, offset: u64, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let mut data = self.buf.write();
        let end = offset as usize + buf.len();
        if end > data.len() {
            return Err(TreeError::InvalidArgument(format!(
                "write of {} bytes at offset {} beyond extent {}",
                buf.len(),
                offset,
                data.len()
            )));
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn allocate(&self, len: u64) -> Result<u64> {
        self.ensure_open()?;
        let mut data = self.buf.write();
        let offset = data.len() as u64;
        let new_len = data.len() + len as usize;
        data.resize(new_len, 0);
        Ok(offset)
    }

    fn extent(&self) -> u64 {
        self.buf.read().len() as u64
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreHeader;
    use crate::TreeConfig;

    #[test]
    fn test_allocate_monotonic() {
        let store = MemoryNodeStore::new();
        let a = store.allocate(100).unwrap();
        let b = store.allocate(100).unwrap();
        assert_eq!(a, HEADER_SIZE);
        assert_eq!(b, HEADER_SIZE + 100);
        assert_eq!(store.extent(), HEADER_SIZE + 200);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let store = MemoryNodeStore::new();
        let offset = store.allocate(8).unwrap();
        store.write_node(offset, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut buf = [0u8; 8];
        store.read_node(offset, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_read_beyond_extent_is_corruption() {
        let store = MemoryNodeStore::new();
        let mut buf = [0u8; 16];
        assert!(matches!(
            store.read_node(HEADER_SIZE, &mut buf),
            Err(TreeError::Corruption(_))
        ));
    }

    #[test]
    fn test_header_slot_reserved() {
        let store = MemoryNodeStore::new();
        let header = StoreHeader::new(&TreeConfig::new(2));
        store.write_header(&header).unwrap();
        assert_eq!(store.read_header().unwrap(), header);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let store = MemoryNodeStore::new();
        let offset = store.allocate(4).unwrap();
        store.write_node(offset, &[9, 9, 9, 9]).unwrap();
        let bytes = store.into_bytes();

        let reopened = MemoryNodeStore::from_bytes(bytes).unwrap();
        let mut buf = [0u8; 4];
        reopened.read_node(offset, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9, 9]);

        assert!(MemoryNodeStore::from_bytes(vec![0u8; 3]).is_err());
    }

    #[test]
    fn test_closed_rejects_operations() {
        let mut store = MemoryNodeStore::new();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        assert!(matches!(store.allocate(8), Err(TreeError::Closed)));
        let mut buf = [0u8; 1];
        assert!(matches!(
            store.read_node(0, &mut buf),
            Err(TreeError::Closed)
        ));
    }
}
