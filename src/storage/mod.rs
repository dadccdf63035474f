//! Node storage backends
//!
//! A [`NodeStore`] owns the physical placement of fixed-size tree node
//! records plus a single header slot at offset 0. Allocation is monotonic:
//! freed node slots are never reused and no free list is kept.

mod channel;
mod memory;

pub use channel::ChannelNodeStore;
pub use memory::MemoryNodeStore;

use serde::{Deserialize, Serialize};

use crate::{Result, TreeConfig, TreeError};

/// Magic number for tree store files (ASCII "HILB")
pub const TREE_MAGIC: u32 = 0x4849_4C42;

/// Current store format version
pub const FORMAT_VERSION: u32 = 1;

/// Fixed byte size of the header slot at offset 0. Node records start here.
pub const HEADER_SIZE: u64 = 64;

/// Persisted tree metadata, written before any node record.
///
/// Serialized with bincode into the fixed header slot, prefixed by a CRC32
/// of the remaining slot bytes. Opening a store re-reads and validates this
/// before trusting anything else in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub magic: u32,
    pub version: u32,
    pub dimensions: u32,
    pub max_entries: u32,
    pub hilbert_order: u32,
    pub crs_tag: u32,
    pub root_offset: u64,
    pub element_count: u64,
    pub node_count: u64,
    pub height: u32,
}

impl StoreHeader {
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            magic: TREE_MAGIC,
            version: FORMAT_VERSION,
            dimensions: config.dimensions as u32,
            max_entries: config.max_entries as u32,
            hilbert_order: config.hilbert_order,
            crs_tag: config.crs_tag,
            root_offset: 0,
            element_count: 0,
            node_count: 0,
            height: 0,
        }
    }

    /// Encode into the fixed header slot: `[crc u32][bincode][zero padding]`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        if body.len() + 4 > HEADER_SIZE as usize {
            return Err(TreeError::Serialization(format!(
                "header body of {} bytes exceeds the {}-byte slot",
                body.len(),
                HEADER_SIZE
            )));
        }
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        buf[4..4 + body.len()].copy_from_slice(&body);
        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decode and validate a header slot (checksum, magic, version).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(TreeError::Corruption(format!(
                "header slot too small: {} bytes",
                buf.len()
            )));
        }
        let stored_crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let actual_crc = crc32fast::hash(&buf[4..HEADER_SIZE as usize]);
        if stored_crc != actual_crc {
            return Err(TreeError::Corruption(format!(
                "header checksum mismatch: stored 0x{:08X}, computed 0x{:08X}",
                stored_crc, actual_crc
            )));
        }
        let header: StoreHeader = bincode::deserialize(&buf[4..HEADER_SIZE as usize])?;
        if header.magic != TREE_MAGIC {
            return Err(TreeError::Corruption(format!(
                "invalid store magic: expected 0x{:08X}, got 0x{:08X}",
                TREE_MAGIC, header.magic
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(TreeError::Corruption(format!(
                "unsupported store version: {}",
                header.version
            )));
        }
        Ok(header)
    }
}

/// Abstraction over the physical placement of fixed-size node records.
///
/// Reads take `&self`; backends guard their handle internally so that
/// multiple search iterators can share one store while mutation is
/// serialized by the owning tree.
pub trait NodeStore {
    /// Read exactly `buf.len()` bytes at `offset`. Reading beyond the
    /// allocated extent is a corruption failure.
    fn read_node(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` at `offset`, which must lie within the allocated extent.
    fn write_node(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Extend the store by `len` bytes and return the offset of the new
    /// region. Monotonic, append-only growth.
    fn allocate(&self, len: u64) -> Result<u64>;

    /// Total allocated length in bytes, header slot included.
    fn extent(&self) -> u64;

    /// Flush buffered writes to the underlying medium.
    fn sync(&self) -> Result<()>;

    /// Flush and release the backend. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn read_header(&self) -> Result<StoreHeader> {
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        self.read_node(0, &mut buf)?;
        StoreHeader::decode(&buf)
    }

    fn write_header(&self, header: &StoreHeader) -> Result<()> {
        self.write_node(0, &header.encode()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let config = TreeConfig::new(3).with_max_entries(32).with_crs_tag(4326);
        let mut header = StoreHeader::new(&config);
        header.root_offset = HEADER_SIZE;
        header.element_count = 17;
        header.node_count = 3;
        header.height = 2;

        let buf = header.encode().unwrap();
        assert_eq!(buf.len(), HEADER_SIZE as usize);
        assert_eq!(StoreHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_checksum_detects_flip() {
        let header = StoreHeader::new(&TreeConfig::new(2));
        let mut buf = header.encode().unwrap();
        buf[20] ^= 0xFF;
        assert!(matches!(
            StoreHeader::decode(&buf),
            Err(TreeError::Corruption(_))
        ));
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut header = StoreHeader::new(&TreeConfig::new(2));
        header.magic = 0xDEAD_BEEF;
        let buf = header.encode().unwrap();
        let err = StoreHeader::decode(&buf).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_header_rejects_future_version() {
        let mut header = StoreHeader::new(&TreeConfig::new(2));
        header.version = FORMAT_VERSION + 1;
        let buf = header.encode().unwrap();
        assert!(matches!(
            StoreHeader::decode(&buf),
            Err(TreeError::Corruption(_))
        ));
    }
}
