//! # hrtree
//!
//! A persistent Hilbert R-tree: a page-oriented spatial index that keeps
//! N-dimensional bounding boxes searchable across process restarts.
//!
//! Leaf entries are ordered by the Hilbert-curve value of their box
//! centers, which makes node splits cheap and spatially coherent. Node
//! records live in a [`storage::NodeStore`] (a growable byte buffer or a
//! file); element payloads live in a separate [`mapper::ElementMapper`].
//! The tree itself never interprets payloads, it routes keys.
//!
//! ## Example
//!
//! ```
//! use hrtree::{Envelope, HilbertRTree, MemoryMapper, MemoryNodeStore, TreeConfig};
//!
//! let mut tree = HilbertRTree::create(
//!     MemoryNodeStore::new(),
//!     MemoryMapper::new(),
//!     TreeConfig::new(2),
//! )?;
//!
//! let bounds = Envelope::rect(0.0, 0.0, 10.0, 10.0)?;
//! let key = tree.insert(&bounds, &"a parcel of land")?;
//!
//! let query = Envelope::rect(5.0, 5.0, 15.0, 15.0)?;
//! for found in tree.search(&query)? {
//!     assert_eq!(found?, key);
//! }
//! tree.close()?;
//! # Ok::<(), hrtree::TreeError>(())
//! ```

pub mod config;
mod error;
pub mod hilbert;
pub mod mapper;
pub mod storage;
pub mod tree;
pub mod types;

pub use config::TreeConfig;
pub use error::{Result, TreeError};
pub use mapper::{ElementMapper, FileMapper, MemoryMapper};
pub use storage::{ChannelNodeStore, MemoryNodeStore, NodeStore, StoreHeader};
pub use tree::{ElementSearch, HilbertRTree, TreeSearch, TreeStats};
pub use types::Envelope;
