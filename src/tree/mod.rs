//! Hilbert R-tree
//!
//! Persistent R-tree whose leaf entries are kept in Hilbert-curve order so
//! that node splits produce spatially compact groups. The tree owns exactly
//! one [`NodeStore`] for fixed-size node records and one [`ElementMapper`]
//! for payloads; node records hold only (bounding box, key) pairs.
//!
//! ## Structure
//! ```text
//! header slot (offset 0)     magic, version, geometry, root offset, counts
//! node records (fixed size)  leaf: (box, element key, hilbert value)
//!                            internal: (box, child node offset)
//! ```
//!
//! Mutation requires `&mut self` and is caller-serialized; any number of
//! lazy searches may run concurrently between mutations. Closing flushes
//! the header and both owned resources; a closed tree only accepts further
//! `close` calls.

mod node;
mod search;

pub use search::{ElementSearch, TreeSearch};

use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use lru::LruCache;
use parking_lot::Mutex;

use crate::hilbert;
use crate::mapper::ElementMapper;
use crate::storage::{NodeStore, StoreHeader, HEADER_SIZE};
use crate::tree::node::{node_size, Entry, Node};
use crate::tree::search::{Candidate, Target};
use crate::types::Envelope;
use crate::{Result, TreeConfig, TreeError};

/// Tree statistics snapshot.
#[derive(Debug, Clone)]
pub struct TreeStats {
    pub element_count: u64,
    pub node_count: u64,
    pub height: u32,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Persistent Hilbert R-tree over a node store and an element mapper.
pub struct HilbertRTree<S: NodeStore, M: ElementMapper> {
    store: S,
    mapper: Mutex<M>,
    cache: Mutex<LruCache<u64, Node>>,
    config: TreeConfig,
    node_size: usize,
    root_offset: u64,
    element_count: u64,
    node_count: u64,
    height: u32,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    closed: bool,
}

enum RemoveOutcome {
    NotFound,
    Removed { mbr: Option<Envelope>, underflow: bool },
}

impl<S: NodeStore, M: ElementMapper> HilbertRTree<S, M> {
    /// Create a fresh tree: writes the header and an empty leaf root into
    /// the given store.
    pub fn create(store: S, mapper: M, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let node_size = node_size(config.dimensions, config.max_entries);

        let mut tree = Self {
            store,
            mapper: Mutex::new(mapper),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
            config,
            node_size,
            root_offset: 0,
            element_count: 0,
            node_count: 1,
            height: 1,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            closed: false,
        };

        tree.root_offset = tree.store.allocate(node_size as u64)?;
        tree.sync_header()?;
        tree.write_node(&Node::new_leaf(tree.root_offset))?;
        debug!(
            "created tree: dimensions={}, max_entries={}, hilbert_order={}",
            tree.config.dimensions, tree.config.max_entries, tree.config.hilbert_order
        );
        Ok(tree)
    }

    /// Attach to a store already populated by a previous tree instance.
    /// The header alone locates the root; no tree walk is performed.
    pub fn open(store: S, mapper: M) -> Result<Self> {
        Self::open_with_cache(store, mapper, crate::config::DEFAULT_CACHE_SIZE)
    }

    /// `open` with an explicit node-cache capacity. The capacity is a
    /// runtime knob and is not persisted in the header.
    pub fn open_with_cache(store: S, mapper: M, cache_size: usize) -> Result<Self> {
        let header = store.read_header()?;
        let config = TreeConfig::new(header.dimensions as usize)
            .with_max_entries(header.max_entries as usize)
            .with_hilbert_order(header.hilbert_order)
            .with_crs_tag(header.crs_tag)
            .with_cache_size(cache_size);
        config.validate().map_err(|e| {
            TreeError::Corruption(format!("header carries an invalid configuration: {}", e))
        })?;

        let node_size = node_size(config.dimensions, config.max_entries);
        if header.root_offset < HEADER_SIZE
            || header.root_offset + node_size as u64 > store.extent()
        {
            return Err(TreeError::Corruption(format!(
                "root offset {} outside store extent {}",
                header.root_offset,
                store.extent()
            )));
        }

        debug!(
            "opened tree: {} elements, {} nodes, height {}",
            header.element_count, header.node_count, header.height
        );
        Ok(Self {
            store,
            mapper: Mutex::new(mapper),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN),
            )),
            config,
            node_size,
            root_offset: header.root_offset,
            element_count: header.element_count,
            node_count: header.node_count,
            height: header.height,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            closed: false,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn len(&self) -> u64 {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            element_count: self.element_count,
            node_count: self.node_count,
            height: self.height,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    /// Insert a payload under the given bounds; returns the assigned key.
    pub fn insert(&mut self, bounds: &Envelope, element: &M::Element) -> Result<u64> {
        self.ensure_open()?;
        self.check_dimensions(bounds)?;

        let key = self.mapper.lock().assign_key(element)?;
        let entry = Entry {
            bounds: bounds.clone(),
            pointer: key,
            hilbert: hilbert::envelope_value(bounds, self.config.hilbert_order),
        };
        self.insert_entry(entry)?;
        self.element_count += 1;
        Ok(key)
    }

    /// Lazy range query; yields keys of entries whose bounds intersect the
    /// query box. Restartable: each call builds an independent iterator.
    pub fn search(&self, query: &Envelope) -> Result<TreeSearch<'_, S, M>> {
        self.ensure_open()?;
        self.check_dimensions(query)?;
        Ok(TreeSearch::new(self, query.clone(), self.root_offset))
    }

    /// Resolve a key through the element mapper.
    pub fn get(&self, key: u64) -> Result<M::Element> {
        self.ensure_open()?;
        self.mapper.lock().element(key)
    }

    /// Remove the leaf entry matching both bounds and key exactly. Returns
    /// whether such an entry existed. Underflowing nodes are dissolved and
    /// their entries reinserted; the mapper slot is cleared on success.
    pub fn remove(&mut self, bounds: &Envelope, key: u64) -> Result<bool> {
        self.ensure_open()?;
        self.check_dimensions(bounds)?;

        let mut orphans = Vec::new();
        let outcome = self.remove_at(self.root_offset, bounds, key, &mut orphans)?;
        if matches!(outcome, RemoveOutcome::NotFound) {
            return Ok(false);
        }

        // A single-child internal root hands its role to that child.
        let mut root_changed = false;
        loop {
            let root = self.read_node(self.root_offset)?;
            if root.is_leaf() || root.entries.len() != 1 {
                break;
            }
            self.root_offset = root.entries[0].pointer;
            self.height -= 1;
            self.node_count -= 1;
            root_changed = true;
            trace!("root collapsed, height now {}", self.height);
        }

        if !orphans.is_empty() {
            debug!("condensing tree: reinserting {} orphaned entries", orphans.len());
            for entry in orphans {
                self.insert_entry(entry)?;
            }
        }

        self.element_count -= 1;
        self.mapper.lock().clear(key)?;
        if root_changed {
            self.sync_header()?;
        }
        Ok(true)
    }

    /// K nearest entries to a point, by distance to their bounding boxes.
    /// Best-first traversal; pairs are returned closest first.
    pub fn nearest(&self, point: &[f64], k: usize) -> Result<Vec<(u64, f64)>> {
        self.ensure_open()?;
        if point.len() != self.config.dimensions {
            return Err(TreeError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: point.len(),
            });
        }
        let mut out = Vec::new();
        if k == 0 || self.element_count == 0 {
            return Ok(out);
        }

        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            dist: 0.0,
            target: Target::Subtree(self.root_offset),
        });
        while let Some(candidate) = heap.pop() {
            match candidate.target {
                Target::Element(key) => {
                    out.push((key, candidate.dist));
                    if out.len() == k {
                        break;
                    }
                }
                Target::Subtree(offset) => {
                    let node = self.read_node(offset)?;
                    let is_leaf = node.is_leaf();
                    for entry in node.entries {
                        let dist = entry.bounds.min_distance(point);
                        let target = if is_leaf {
                            Target::Element(entry.pointer)
                        } else {
                            Target::Subtree(entry.pointer)
                        };
                        heap.push(Candidate { dist, target });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Persist the header and flush the store.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.sync_header()?;
        self.store.sync()
    }

    /// Flush the header and close both the store and the mapper. Calling
    /// `close` again is a no-op; any other operation afterwards fails.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.sync_header()?;
        self.mapper.lock().close()?;
        self.store.close()?;
        self.closed = true;
        debug!("closed tree with {} elements", self.element_count);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the store and mapper, e.g. to extract a memory store's byte
    /// image after `close`.
    pub fn into_parts(self) -> (S, M) {
        (self.store, self.mapper.into_inner())
    }

    /// Walk the whole tree checking structural invariants: occupancy
    /// bounds, parent boxes containing child boxes, leaf Hilbert ordering,
    /// uniform leaf depth and header counters.
    pub fn check_structure(&self) -> Result<()> {
        self.ensure_open()?;
        let (elements, nodes, depth) = self.check_node(self.root_offset, true)?;
        if depth != self.height {
            return Err(TreeError::Corruption(format!(
                "leaf depth {} disagrees with recorded height {}",
                depth, self.height
            )));
        }
        if elements != self.element_count {
            return Err(TreeError::Corruption(format!(
                "tree holds {} elements, header records {}",
                elements, self.element_count
            )));
        }
        if nodes != self.node_count {
            return Err(TreeError::Corruption(format!(
                "tree holds {} reachable nodes, header records {}",
                nodes, self.node_count
            )));
        }
        Ok(())
    }

    fn check_node(&self, offset: u64, is_root: bool) -> Result<(u64, u64, u32)> {
        let node = self.read_node(offset)?;
        let count = node.entries.len();
        if count > self.config.max_entries {
            return Err(TreeError::Corruption(format!(
                "node at offset {} exceeds max entries",
                offset
            )));
        }
        if !is_root && count < self.config.min_entries() {
            return Err(TreeError::Corruption(format!(
                "node at offset {} underflows minimum occupancy: {} < {}",
                offset,
                count,
                self.config.min_entries()
            )));
        }
        if is_root && !node.is_leaf() && count < 2 {
            return Err(TreeError::Corruption(
                "internal root with fewer than two children".into(),
            ));
        }

        if node.is_leaf() {
            for pair in node.entries.windows(2) {
                if pair[0].hilbert > pair[1].hilbert {
                    return Err(TreeError::Corruption(format!(
                        "leaf at offset {} is not in hilbert order",
                        offset
                    )));
                }
            }
            return Ok((count as u64, 1, 1));
        }

        let mut elements = 0u64;
        let mut nodes = 1u64;
        let mut child_depth = None;
        for entry in &node.entries {
            let child = self.read_node(entry.pointer)?;
            let child_mbr = child.mbr().ok_or_else(|| {
                TreeError::Corruption(format!("empty child node at offset {}", entry.pointer))
            })?;
            if !entry.bounds.contains_envelope(&child_mbr) {
                return Err(TreeError::Corruption(format!(
                    "parent box at offset {} does not cover child at offset {}",
                    offset, entry.pointer
                )));
            }
            let (el, nd, depth) = self.check_node(entry.pointer, false)?;
            elements += el;
            nodes += nd;
            match child_depth {
                None => child_depth = Some(depth),
                Some(d) if d != depth => {
                    return Err(TreeError::Corruption(format!(
                        "unbalanced subtree under offset {}",
                        offset
                    )))
                }
                _ => {}
            }
        }
        Ok((elements, nodes, child_depth.unwrap_or(0) + 1))
    }

    // ----- internals -----

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TreeError::Closed);
        }
        Ok(())
    }

    fn check_dimensions(&self, bounds: &Envelope) -> Result<()> {
        if bounds.dimension() != self.config.dimensions {
            return Err(TreeError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: bounds.dimension(),
            });
        }
        Ok(())
    }

    fn sync_header(&self) -> Result<()> {
        let mut header = StoreHeader::new(&self.config);
        header.root_offset = self.root_offset;
        header.element_count = self.element_count;
        header.node_count = self.node_count;
        header.height = self.height;
        self.store.write_header(&header)
    }

    pub(crate) fn read_node(&self, offset: u64) -> Result<Node> {
        {
            let mut cache = self.cache.lock();
            if let Some(node) = cache.get(&offset) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(node.clone());
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let mut buf = vec![0u8; self.node_size];
        self.store.read_node(offset, &mut buf)?;
        let node = Node::decode(offset, &buf, self.config.dimensions, self.config.max_entries)?;
        self.cache.lock().put(offset, node.clone());
        Ok(node)
    }

    /// Write-through: the record goes to the store and the cache together.
    fn write_node(&self, node: &Node) -> Result<()> {
        let buf = node.encode(self.config.dimensions, self.config.max_entries)?;
        self.store.write_node(node.offset, &buf)?;
        self.cache.lock().put(node.offset, node.clone());
        Ok(())
    }

    /// Insert an already-keyed entry, splitting and raising the root as
    /// needed. Shared by `insert` and condense-tree reinsertion.
    fn insert_entry(&mut self, entry: Entry) -> Result<()> {
        let (root_mbr, split) = self.insert_at(self.root_offset, entry)?;
        if let Some(sibling) = split {
            let old_root = self.root_offset;
            let new_offset = self.store.allocate(self.node_size as u64)?;
            let mut new_root = Node::new_internal(new_offset);
            new_root.entries.push(Entry {
                bounds: root_mbr,
                pointer: old_root,
                hilbert: 0,
            });
            new_root.entries.push(sibling);
            self.write_node(&new_root)?;
            self.root_offset = new_offset;
            self.node_count += 1;
            self.height += 1;
            self.sync_header()?;
            debug!("root split, height now {}", self.height);
        }
        Ok(())
    }

    /// Recursive descent. Returns the node's bounding box after the insert
    /// and, when the node overflowed, an entry for its new sibling. Parent
    /// boxes are enlarged on the way back up, before each split decision.
    fn insert_at(&mut self, offset: u64, entry: Entry) -> Result<(Envelope, Option<Entry>)> {
        let mut node = self.read_node(offset)?;

        if node.is_leaf() {
            let pos = node
                .entries
                .partition_point(|e| e.hilbert <= entry.hilbert);
            node.entries.insert(pos, entry);
            let sibling = if node.entries.len() > self.config.max_entries {
                Some(self.split_node(&mut node)?)
            } else {
                None
            };
            self.write_node(&node)?;
            return Ok((self.non_empty_mbr(&node)?, sibling));
        }

        let child_idx = self.choose_subtree(&node, &entry.bounds);
        let child_offset = node.entries[child_idx].pointer;
        let (child_mbr, child_split) = self.insert_at(child_offset, entry)?;
        node.entries[child_idx].bounds = child_mbr;
        if let Some(new_child) = child_split {
            node.entries.push(new_child);
        }
        let sibling = if node.entries.len() > self.config.max_entries {
            Some(self.split_node(&mut node)?)
        } else {
            None
        };
        self.write_node(&node)?;
        Ok((self.non_empty_mbr(&node)?, sibling))
    }

    /// Least-enlargement child choice; ties broken by smaller area, then by
    /// the lower Hilbert value of the child region's center.
    fn choose_subtree(&self, node: &Node, bounds: &Envelope) -> usize {
        let order = self.config.hilbert_order;
        let mut best = 0;
        let mut best_enlargement = f64::INFINITY;
        let mut best_area = f64::INFINITY;
        let mut best_hilbert = u128::MAX;

        for (i, entry) in node.entries.iter().enumerate() {
            let enlargement = entry.bounds.enlargement(bounds);
            let area = entry.bounds.area();
            let hv = hilbert::envelope_value(&entry.bounds, order);
            let better = if enlargement != best_enlargement {
                enlargement < best_enlargement
            } else if area != best_area {
                area < best_area
            } else {
                hv < best_hilbert
            };
            if better {
                best = i;
                best_enlargement = enlargement;
                best_area = area;
                best_hilbert = hv;
            }
        }
        best
    }

    /// Split an overflowing node in two at the Hilbert-order midpoint. The
    /// right half moves to a freshly allocated node; an entry describing it
    /// is returned for the parent.
    fn split_node(&mut self, node: &mut Node) -> Result<Entry> {
        if !node.is_leaf() {
            // Internal slots persist no Hilbert value; order them by their
            // region centers for the split.
            let order = self.config.hilbert_order;
            node.entries
                .sort_by_key(|e| hilbert::envelope_value(&e.bounds, order));
        }
        let split_at = (node.entries.len() + 1) / 2;
        let right_entries = node.entries.split_off(split_at);

        let right_offset = self.store.allocate(self.node_size as u64)?;
        let right = Node {
            offset: right_offset,
            kind: node.kind,
            entries: right_entries,
        };
        self.write_node(&right)?;
        self.node_count += 1;
        trace!(
            "split node at offset {}: {} + {} entries",
            node.offset,
            node.entries.len(),
            right.entries.len()
        );

        Ok(Entry {
            bounds: self.non_empty_mbr(&right)?,
            pointer: right_offset,
            hilbert: 0,
        })
    }

    fn remove_at(
        &mut self,
        offset: u64,
        bounds: &Envelope,
        key: u64,
        orphans: &mut Vec<Entry>,
    ) -> Result<RemoveOutcome> {
        let mut node = self.read_node(offset)?;

        if node.is_leaf() {
            let found = node
                .entries
                .iter()
                .position(|e| e.pointer == key && e.bounds == *bounds);
            let Some(idx) = found else {
                return Ok(RemoveOutcome::NotFound);
            };
            node.entries.remove(idx);
            self.write_node(&node)?;
            return Ok(RemoveOutcome::Removed {
                mbr: node.mbr(),
                underflow: node.entries.len() < self.config.min_entries(),
            });
        }

        for idx in 0..node.entries.len() {
            if !node.entries[idx].bounds.intersects(bounds) {
                continue;
            }
            let child_offset = node.entries[idx].pointer;
            match self.remove_at(child_offset, bounds, key, orphans)? {
                RemoveOutcome::NotFound => continue,
                RemoveOutcome::Removed { mbr, underflow } => {
                    if underflow {
                        let dissolved = self.collect_leaf_entries(child_offset, orphans)?;
                        self.node_count -= dissolved;
                        node.entries.remove(idx);
                    } else if let Some(mbr) = mbr {
                        node.entries[idx].bounds = mbr;
                    }
                    self.write_node(&node)?;
                    return Ok(RemoveOutcome::Removed {
                        mbr: node.mbr(),
                        underflow: node.entries.len() < self.config.min_entries(),
                    });
                }
            }
        }
        Ok(RemoveOutcome::NotFound)
    }

    /// Gather every leaf entry under a dissolved subtree for reinsertion.
    /// Returns the number of nodes the subtree occupied; their slots are
    /// leaked (allocation is monotonic, there is no free list).
    fn collect_leaf_entries(&mut self, offset: u64, orphans: &mut Vec<Entry>) -> Result<u64> {
        let node = self.read_node(offset)?;
        self.cache.lock().pop(&offset);
        let mut dissolved = 1;
        if node.is_leaf() {
            orphans.extend(node.entries);
        } else {
            for entry in &node.entries {
                dissolved += self.collect_leaf_entries(entry.pointer, orphans)?;
            }
        }
        Ok(dissolved)
    }

    fn non_empty_mbr(&self, node: &Node) -> Result<Envelope> {
        node.mbr().ok_or_else(|| {
            TreeError::Corruption(format!(
                "node at offset {} has no entries where at least one is required",
                node.offset
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{FileMapper, MemoryMapper};
    use crate::storage::{ChannelNodeStore, MemoryNodeStore};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    type MemTree = HilbertRTree<MemoryNodeStore, MemoryMapper<u64>>;

    fn mem_tree(config: TreeConfig) -> MemTree {
        HilbertRTree::create(MemoryNodeStore::new(), MemoryMapper::new(), config).unwrap()
    }

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Envelope {
        Envelope::rect(min_x, min_y, max_x, max_y).unwrap()
    }

    fn random_rect(rng: &mut StdRng) -> Envelope {
        let x = rng.gen_range(0.0..1000.0);
        let y = rng.gen_range(0.0..1000.0);
        let w = rng.gen_range(0.0..20.0);
        let h = rng.gen_range(0.0..20.0);
        rect(x, y, x + w, y + h)
    }

    fn collect_keys(tree: &MemTree, query: &Envelope) -> Vec<u64> {
        let mut keys: Vec<u64> = tree
            .search(query)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn empty_tree_search_yields_nothing() {
        let tree = mem_tree(TreeConfig::new(2));
        assert!(tree.is_empty());
        assert_eq!(collect_keys(&tree, &rect(0.0, 0.0, 100.0, 100.0)), vec![]);
    }

    #[test]
    fn single_insert_and_query() {
        let mut tree = mem_tree(TreeConfig::new(2));
        let bounds = rect(10.0, 10.0, 20.0, 20.0);
        let key = tree.insert(&bounds, &42).unwrap();

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(key).unwrap(), 42);
        assert_eq!(collect_keys(&tree, &bounds), vec![key]);
        // Touching at a corner still intersects.
        assert_eq!(collect_keys(&tree, &rect(20.0, 20.0, 30.0, 30.0)), vec![key]);
        // Disjoint query box finds nothing.
        assert_eq!(collect_keys(&tree, &rect(30.0, 30.0, 40.0, 40.0)), vec![]);
    }

    #[test]
    fn random_inserts_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(8));
        let mut reference = Vec::new();

        for i in 0..300u64 {
            let bounds = random_rect(&mut rng);
            let key = tree.insert(&bounds, &i).unwrap();
            reference.push((key, bounds));
        }
        assert_eq!(tree.len(), 300);
        assert!(tree.height() > 1);
        tree.check_structure().unwrap();

        for _ in 0..50 {
            let query = random_rect(&mut rng);
            let mut expected: Vec<u64> = reference
                .iter()
                .filter(|(_, b)| b.intersects(&query))
                .map(|(k, _)| *k)
                .collect();
            expected.sort_unstable();
            assert_eq!(collect_keys(&tree, &query), expected);
        }
    }

    #[test]
    fn three_dimensional_queries() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut tree = HilbertRTree::create(
            MemoryNodeStore::new(),
            MemoryMapper::new(),
            TreeConfig::new(3).with_max_entries(6),
        )
        .unwrap();
        let mut reference = Vec::new();

        for i in 0..120u64 {
            let min: Vec<f64> = (0..3).map(|_| rng.gen_range(0.0..100.0)).collect();
            let max: Vec<f64> = min.iter().map(|v| v + rng.gen_range(0.0..5.0)).collect();
            let bounds = Envelope::new(min, max).unwrap();
            let key = tree.insert(&bounds, &i).unwrap();
            reference.push((key, bounds));
        }
        tree.check_structure().unwrap();

        let query = Envelope::new(vec![20.0, 20.0, 20.0], vec![60.0, 60.0, 60.0]).unwrap();
        let mut expected: Vec<u64> = reference
            .iter()
            .filter(|(_, b)| b.intersects(&query))
            .map(|(k, _)| *k)
            .collect();
        expected.sort_unstable();
        let mut got: Vec<u64> = tree
            .search(&query)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        got.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn element_search_materializes_payloads() {
        let mut tree = mem_tree(TreeConfig::new(2));
        let bounds = rect(1.0, 1.0, 2.0, 2.0);
        let key = tree.insert(&bounds, &99).unwrap();

        let pairs: Vec<(u64, u64)> = tree
            .search(&bounds)
            .unwrap()
            .elements()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(pairs, vec![(key, 99)]);
    }

    #[test]
    fn remove_clears_entry_and_mapper_slot() {
        let mut tree = mem_tree(TreeConfig::new(2));
        let a = rect(0.0, 0.0, 1.0, 1.0);
        let b = rect(5.0, 5.0, 6.0, 6.0);
        let ka = tree.insert(&a, &1).unwrap();
        let kb = tree.insert(&b, &2).unwrap();

        assert!(tree.remove(&a, ka).unwrap());
        assert_eq!(tree.len(), 1);
        assert_eq!(collect_keys(&tree, &rect(0.0, 0.0, 10.0, 10.0)), vec![kb]);
        assert!(matches!(tree.get(ka), Err(TreeError::NotFound(_))));

        // Same key again, or the wrong box, is a miss.
        assert!(!tree.remove(&a, ka).unwrap());
        assert!(!tree.remove(&a, kb).unwrap());
    }

    #[test]
    fn remove_condenses_underflowing_nodes() {
        let mut rng = StdRng::seed_from_u64(23);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(4));
        let mut reference = Vec::new();

        for i in 0..60u64 {
            let bounds = random_rect(&mut rng);
            let key = tree.insert(&bounds, &i).unwrap();
            reference.push((key, bounds));
        }
        tree.check_structure().unwrap();

        for _ in 0..45 {
            let idx = rng.gen_range(0..reference.len());
            let (key, bounds) = reference.swap_remove(idx);
            assert!(tree.remove(&bounds, key).unwrap());
            tree.check_structure().unwrap();
        }
        assert_eq!(tree.len(), 15);

        let everything = rect(-1.0, -1.0, 1100.0, 1100.0);
        let mut expected: Vec<u64> = reference.iter().map(|(k, _)| *k).collect();
        expected.sort_unstable();
        assert_eq!(collect_keys(&tree, &everything), expected);
    }

    #[test]
    fn remove_down_to_empty() {
        let mut rng = StdRng::seed_from_u64(31);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(4));
        let mut reference = Vec::new();
        for i in 0..25u64 {
            let bounds = random_rect(&mut rng);
            reference.push((tree.insert(&bounds, &i).unwrap(), bounds));
        }
        for (key, bounds) in reference {
            assert!(tree.remove(&bounds, key).unwrap());
        }
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        tree.check_structure().unwrap();
        assert_eq!(collect_keys(&tree, &rect(0.0, 0.0, 1000.0, 1000.0)), vec![]);
    }

    #[test]
    fn identical_boxes_split_and_remove() {
        // Equal Hilbert values everywhere: splits and removal tie-breaks
        // must still hold up.
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(4));
        let bounds = rect(10.0, 10.0, 11.0, 11.0);
        let keys: Vec<u64> = (0..30u64)
            .map(|i| tree.insert(&bounds, &i).unwrap())
            .collect();
        tree.check_structure().unwrap();
        assert_eq!(collect_keys(&tree, &bounds), keys);

        for key in &keys[..20] {
            assert!(tree.remove(&bounds, *key).unwrap());
            tree.check_structure().unwrap();
        }
        assert_eq!(collect_keys(&tree, &bounds), keys[20..].to_vec());
    }

    #[test]
    fn negative_coordinate_range_queries() {
        let mut rng = StdRng::seed_from_u64(83);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(8));
        let mut reference = Vec::new();
        for i in 0..150u64 {
            let x = rng.gen_range(-500.0..500.0);
            let y = rng.gen_range(-500.0..500.0);
            let bounds = rect(x, y, x + rng.gen_range(0.0..10.0), y + rng.gen_range(0.0..10.0));
            reference.push((tree.insert(&bounds, &i).unwrap(), bounds));
        }
        tree.check_structure().unwrap();

        for query in [
            rect(-600.0, -600.0, 600.0, 600.0),
            rect(-100.0, -100.0, 100.0, 100.0),
            rect(-450.0, 200.0, -50.0, 400.0),
        ] {
            let mut expected: Vec<u64> = reference
                .iter()
                .filter(|(_, b)| b.intersects(&query))
                .map(|(k, _)| *k)
                .collect();
            expected.sort_unstable();
            assert_eq!(collect_keys(&tree, &query), expected);
        }
    }

    #[test]
    fn nearest_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(41);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(8));
        let mut reference = Vec::new();
        for i in 0..200u64 {
            let bounds = random_rect(&mut rng);
            reference.push((tree.insert(&bounds, &i).unwrap(), bounds));
        }

        let point = [500.0, 500.0];
        let got = tree.nearest(&point, 10).unwrap();
        assert_eq!(got.len(), 10);

        let mut expected: Vec<f64> = reference
            .iter()
            .map(|(_, b)| b.min_distance(&point))
            .collect();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for (i, (_, dist)) in got.iter().enumerate() {
            assert_eq!(*dist, expected[i]);
        }
        // Closest first.
        for pair in got.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn nearest_edge_cases() {
        let mut tree = mem_tree(TreeConfig::new(2));
        assert_eq!(tree.nearest(&[0.0, 0.0], 5).unwrap(), vec![]);

        let key = tree.insert(&rect(3.0, 4.0, 3.0, 4.0), &7).unwrap();
        assert_eq!(tree.nearest(&[3.0, 4.0], 0).unwrap(), vec![]);
        // Asking for more than the tree holds returns what it has.
        let got = tree.nearest(&[0.0, 0.0], 5).unwrap();
        assert_eq!(got, vec![(key, 5.0)]);

        assert!(matches!(
            tree.nearest(&[0.0, 0.0, 0.0], 1),
            Err(TreeError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn memory_store_roundtrip() {
        let mut rng = StdRng::seed_from_u64(53);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(8));
        let mut reference = Vec::new();
        for i in 0..80u64 {
            let bounds = random_rect(&mut rng);
            reference.push((tree.insert(&bounds, &i).unwrap(), bounds));
        }
        // Flush rather than close: the memory mapper is carried over to the
        // reopened tree and a closed mapper stays closed.
        tree.flush().unwrap();
        let (store, mapper) = tree.into_parts();
        let bytes = store.into_bytes();

        let reopened: MemTree =
            HilbertRTree::open(MemoryNodeStore::from_bytes(bytes).unwrap(), mapper).unwrap();
        assert_eq!(reopened.len(), 80);
        reopened.check_structure().unwrap();

        let everything = rect(-1.0, -1.0, 1100.0, 1100.0);
        let mut expected: Vec<u64> = reference.iter().map(|(k, _)| *k).collect();
        expected.sort_unstable();
        assert_eq!(collect_keys(&reopened, &everything), expected);
        for (key, _) in &reference {
            assert_eq!(reopened.get(*key).unwrap(), *key);
        }
    }

    #[test]
    fn file_backed_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store_path = dir.path().join("tree.hrt");
        let mapper_path = dir.path().join("tree.map");

        let mut rng = StdRng::seed_from_u64(61);
        let mut reference = Vec::new();
        {
            let store = ChannelNodeStore::create(&store_path).unwrap();
            let mapper: FileMapper<String> = FileMapper::create(&mapper_path).unwrap();
            let mut tree =
                HilbertRTree::create(store, mapper, TreeConfig::new(2).with_max_entries(8))
                    .unwrap();
            for i in 0..100 {
                let bounds = random_rect(&mut rng);
                let key = tree.insert(&bounds, &format!("feature-{}", i)).unwrap();
                reference.push((key, bounds, format!("feature-{}", i)));
            }
            tree.close().unwrap();
        }

        let store = ChannelNodeStore::open(&store_path).unwrap();
        let mapper: FileMapper<String> = FileMapper::open(&mapper_path).unwrap();
        let tree = HilbertRTree::open(store, mapper).unwrap();
        assert_eq!(tree.len(), 100);
        tree.check_structure().unwrap();

        for (key, bounds, payload) in &reference {
            let hits: Vec<u64> = tree
                .search(bounds)
                .unwrap()
                .collect::<Result<Vec<_>>>()
                .unwrap();
            assert!(hits.contains(key));
            assert_eq!(tree.get(*key).unwrap(), *payload);
        }
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let mut tree = mem_tree(TreeConfig::new(2));
        let bounds = rect(0.0, 0.0, 1.0, 1.0);
        let key = tree.insert(&bounds, &1).unwrap();

        tree.close().unwrap();
        assert!(tree.is_closed());
        tree.close().unwrap();

        assert!(matches!(tree.insert(&bounds, &2), Err(TreeError::Closed)));
        assert!(matches!(tree.search(&bounds), Err(TreeError::Closed)));
        assert!(matches!(tree.remove(&bounds, key), Err(TreeError::Closed)));
        assert!(matches!(tree.get(key), Err(TreeError::Closed)));
        assert!(matches!(tree.flush(), Err(TreeError::Closed)));
    }

    #[test]
    fn dimension_mismatch_is_rejected_before_mutation() {
        let mut tree = mem_tree(TreeConfig::new(2));
        let bounds = Envelope::new(vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]).unwrap();
        assert!(matches!(
            tree.insert(&bounds, &1),
            Err(TreeError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn open_rejects_corrupted_header() {
        let mut tree = mem_tree(TreeConfig::new(2));
        tree.insert(&rect(0.0, 0.0, 1.0, 1.0), &1).unwrap();
        tree.flush().unwrap();
        let (store, mapper) = tree.into_parts();

        let mut bytes = store.into_bytes();
        bytes[9] ^= 0xFF;
        let tampered = MemoryNodeStore::from_bytes(bytes).unwrap();
        assert!(matches!(
            HilbertRTree::open(tampered, mapper),
            Err(TreeError::Corruption(_))
        ));
    }

    #[test]
    fn stats_track_counts_and_cache() {
        let mut rng = StdRng::seed_from_u64(71);
        let mut tree = mem_tree(TreeConfig::new(2).with_max_entries(4));
        for i in 0..50u64 {
            tree.insert(&random_rect(&mut rng), &i).unwrap();
        }
        let stats = tree.stats();
        assert_eq!(stats.element_count, 50);
        assert!(stats.node_count > 1);
        assert!(stats.height > 1);
        assert!(stats.cache_hits > 0);
    }
}
