//! Fixed-size node records
//!
//! Layout (little-endian), `node_size = 8 + max_entries * (16*D + 24)`:
//!
//! ```text
//! [kind u8][count u16][reserved u8][crc u32]
//! max_entries slots of: min[D] f64, max[D] f64, pointer u64, hilbert u128
//! ```
//!
//! `pointer` is an element key in leaves and a child node offset in internal
//! nodes. The Hilbert value is meaningful for leaf entries only; internal
//! slots keep it zero. The CRC covers the whole record with the crc field
//! itself zeroed.

use crate::types::Envelope;
use crate::{Result, TreeError};

const NODE_HEADER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Leaf,
    Internal,
}

/// One (bounding box, pointer) slot of a node.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub bounds: Envelope,
    pub pointer: u64,
    pub hilbert: u128,
}

/// Decoded tree node.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub offset: u64,
    pub kind: NodeKind,
    pub entries: Vec<Entry>,
}

/// Byte size of one node record for the given geometry.
pub(crate) fn node_size(dimensions: usize, max_entries: usize) -> usize {
    NODE_HEADER + max_entries * entry_size(dimensions)
}

fn entry_size(dimensions: usize) -> usize {
    16 * dimensions + 24
}

impl Node {
    pub fn new_leaf(offset: u64) -> Self {
        Self {
            offset,
            kind: NodeKind::Leaf,
            entries: Vec::new(),
        }
    }

    pub fn new_internal(offset: u64) -> Self {
        Self {
            offset,
            kind: NodeKind::Internal,
            entries: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Minimum bounding box of all entries; `None` for an empty node.
    pub fn mbr(&self) -> Option<Envelope> {
        let mut iter = self.entries.iter();
        let mut mbr = iter.next()?.bounds.clone();
        for entry in iter {
            mbr.expand_to_include(&entry.bounds);
        }
        Some(mbr)
    }

    /// Serialize into a fixed-size record. The entry count must not exceed
    /// `max_entries`; overflow is resolved by splitting before writing.
    pub fn encode(&self, dimensions: usize, max_entries: usize) -> Result<Vec<u8>> {
        if self.entries.len() > max_entries {
            return Err(TreeError::InvalidArgument(format!(
                "node at offset {} holds {} entries, limit is {}",
                self.offset,
                self.entries.len(),
                max_entries
            )));
        }
        let mut buf = vec![0u8; node_size(dimensions, max_entries)];
        buf[0] = match self.kind {
            NodeKind::Leaf => 0,
            NodeKind::Internal => 1,
        };
        buf[1..3].copy_from_slice(&(self.entries.len() as u16).to_le_bytes());

        let mut offset = NODE_HEADER;
        for entry in &self.entries {
            if entry.bounds.dimension() != dimensions {
                return Err(TreeError::DimensionMismatch {
                    expected: dimensions,
                    actual: entry.bounds.dimension(),
                });
            }
            for d in 0..dimensions {
                buf[offset..offset + 8].copy_from_slice(&entry.bounds.min(d).to_le_bytes());
                offset += 8;
            }
            for d in 0..dimensions {
                buf[offset..offset + 8].copy_from_slice(&entry.bounds.max(d).to_le_bytes());
                offset += 8;
            }
            buf[offset..offset + 8].copy_from_slice(&entry.pointer.to_le_bytes());
            offset += 8;
            buf[offset..offset + 16].copy_from_slice(&entry.hilbert.to_le_bytes());
            offset += 16;
        }

        let crc = record_crc(&buf);
        buf[4..8].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Deserialize a record read from `offset`, validating checksum, kind
    /// tag, entry count and per-entry box invariants.
    pub fn decode(
        offset: u64,
        buf: &[u8],
        dimensions: usize,
        max_entries: usize,
    ) -> Result<Self> {
        if buf.len() != node_size(dimensions, max_entries) {
            return Err(TreeError::Corruption(format!(
                "node record at offset {} has {} bytes, expected {}",
                offset,
                buf.len(),
                node_size(dimensions, max_entries)
            )));
        }

        let stored_crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let mut check = buf.to_vec();
        check[4..8].copy_from_slice(&[0u8; 4]);
        let actual_crc = record_crc(&check);
        if stored_crc != actual_crc {
            return Err(TreeError::Corruption(format!(
                "node checksum mismatch at offset {}: stored 0x{:08X}, computed 0x{:08X}",
                offset, stored_crc, actual_crc
            )));
        }

        let kind = match buf[0] {
            0 => NodeKind::Leaf,
            1 => NodeKind::Internal,
            tag => {
                return Err(TreeError::Corruption(format!(
                    "invalid node kind tag {} at offset {}",
                    tag, offset
                )))
            }
        };
        let count = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        if count > max_entries {
            return Err(TreeError::Corruption(format!(
                "node at offset {} claims {} entries, limit is {}",
                offset, count, max_entries
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut pos = NODE_HEADER;
        for _ in 0..count {
            let mut min = Vec::with_capacity(dimensions);
            let mut max = Vec::with_capacity(dimensions);
            for _ in 0..dimensions {
                min.push(read_f64(buf, pos));
                pos += 8;
            }
            for _ in 0..dimensions {
                max.push(read_f64(buf, pos));
                pos += 8;
            }
            let bounds = Envelope::new(min, max).map_err(|e| {
                TreeError::Corruption(format!(
                    "invalid entry bounds in node at offset {}: {}",
                    offset, e
                ))
            })?;

            let mut p = [0u8; 8];
            p.copy_from_slice(&buf[pos..pos + 8]);
            let pointer = u64::from_le_bytes(p);
            pos += 8;

            let mut h = [0u8; 16];
            h.copy_from_slice(&buf[pos..pos + 16]);
            let hilbert = u128::from_le_bytes(h);
            pos += 16;

            entries.push(Entry {
                bounds,
                pointer,
                hilbert,
            });
        }

        Ok(Self {
            offset,
            kind,
            entries,
        })
    }
}

fn record_crc(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..4]);
    hasher.update(&buf[NODE_HEADER..]);
    hasher.finalize()
}

fn read_f64(buf: &[u8], pos: usize) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    f64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_fixture() -> Node {
        let mut node = Node::new_leaf(64);
        node.entries.push(Entry {
            bounds: Envelope::rect(0.0, 0.0, 1.0, 2.0).unwrap(),
            pointer: 11,
            hilbert: 0x1234_5678_9ABC_DEF0,
        });
        node.entries.push(Entry {
            bounds: Envelope::rect(-5.0, -5.0, -4.0, -3.5).unwrap(),
            pointer: 12,
            hilbert: 42,
        });
        node
    }

    #[test]
    fn test_leaf_roundtrip() {
        let node = leaf_fixture();
        let buf = node.encode(2, 8).unwrap();
        assert_eq!(buf.len(), node_size(2, 8));

        let decoded = Node::decode(64, &buf, 2, 8).unwrap();
        assert!(decoded.is_leaf());
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].pointer, 11);
        assert_eq!(decoded.entries[0].hilbert, 0x1234_5678_9ABC_DEF0);
        assert_eq!(decoded.entries[1].bounds, node.entries[1].bounds);
    }

    #[test]
    fn test_internal_roundtrip_3d() {
        let mut node = Node::new_internal(128);
        node.entries.push(Entry {
            bounds: Envelope::new(vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]).unwrap(),
            pointer: 4096,
            hilbert: 0,
        });
        let buf = node.encode(3, 4).unwrap();
        let decoded = Node::decode(128, &buf, 3, 4).unwrap();
        assert!(!decoded.is_leaf());
        assert_eq!(decoded.entries[0].pointer, 4096);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let node = leaf_fixture();
        let mut buf = node.encode(2, 8).unwrap();
        buf[NODE_HEADER + 3] ^= 0x01;
        assert!(matches!(
            Node::decode(64, &buf, 2, 8),
            Err(TreeError::Corruption(_))
        ));
    }

    #[test]
    fn test_rejects_overflowing_node() {
        let mut node = Node::new_leaf(64);
        for i in 0..5 {
            node.entries.push(Entry {
                bounds: Envelope::rect(0.0, 0.0, 1.0, 1.0).unwrap(),
                pointer: i,
                hilbert: i as u128,
            });
        }
        assert!(node.encode(2, 4).is_err());
    }

    #[test]
    fn test_mbr() {
        let node = leaf_fixture();
        let mbr = node.mbr().unwrap();
        assert_eq!(mbr.min(0), -5.0);
        assert_eq!(mbr.max(1), 2.0);
        assert!(Node::new_leaf(64).mbr().is_none());
    }
}
