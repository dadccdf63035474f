//! Element mappers
//!
//! The tree stores only (bounding box, key) pairs; the payload itself lives
//! behind an [`ElementMapper`]. The mapper exclusively owns its payload
//! storage and its keys stay valid across a tree close/reopen cycle.

mod file;
mod memory;

pub use file::FileMapper;
pub use memory::MemoryMapper;

use crate::Result;

/// Pluggable mapping between tree keys and application payloads.
pub trait ElementMapper {
    type Element;

    /// Resolve a key to its payload. Unknown or cleared keys fail with
    /// `NotFound`.
    fn element(&mut self, key: u64) -> Result<Self::Element>;

    /// Persist a new payload and return its key. Keys are assigned
    /// monotonically and remain stable across reopen.
    fn assign_key(&mut self, element: &Self::Element) -> Result<u64>;

    /// Free the slot for `key`; subsequent `element(key)` fails.
    fn clear(&mut self, key: u64) -> Result<()>;

    /// Flush pending writes and release resources. Idempotent.
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
