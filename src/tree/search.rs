//! Lazy search iterators
//!
//! Searches are pull-based: tree nodes are read and element keys resolved
//! only as the caller consumes the iterator, and abandoning an iterator
//! releases nothing because it owns nothing; it borrows the tree's own
//! store handle. Exhaustion is an explicit `None`, never an error.

use std::cmp::Ordering;
use std::collections::VecDeque;

use crate::mapper::ElementMapper;
use crate::storage::NodeStore;
use crate::tree::HilbertRTree;
use crate::types::Envelope;
use crate::Result;

/// Lazy sequence of element keys whose bounds intersect a query box.
///
/// Results carry no ordering contract; traversal order is an artifact of
/// the tree structure. A failed node read ends the sequence after yielding
/// the error once.
pub struct TreeSearch<'a, S: NodeStore, M: ElementMapper> {
    tree: &'a HilbertRTree<S, M>,
    query: Envelope,
    stack: Vec<u64>,
    pending: VecDeque<u64>,
    failed: bool,
}

impl<'a, S: NodeStore, M: ElementMapper> TreeSearch<'a, S, M> {
    pub(crate) fn new(tree: &'a HilbertRTree<S, M>, query: Envelope, root: u64) -> Self {
        Self {
            tree,
            query,
            stack: vec![root],
            pending: VecDeque::new(),
            failed: false,
        }
    }

    /// Materialize payloads through the tree's element mapper as consumed.
    pub fn elements(self) -> ElementSearch<'a, S, M> {
        ElementSearch { inner: self }
    }
}

impl<'a, S: NodeStore, M: ElementMapper> Iterator for TreeSearch<'a, S, M> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(key) = self.pending.pop_front() {
                return Some(Ok(key));
            }
            let offset = self.stack.pop()?;
            let node = match self.tree.read_node(offset) {
                Ok(node) => node,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };
            if node.is_leaf() {
                for entry in &node.entries {
                    if entry.bounds.intersects(&self.query) {
                        self.pending.push_back(entry.pointer);
                    }
                }
            } else {
                for entry in &node.entries {
                    if entry.bounds.intersects(&self.query) {
                        self.stack.push(entry.pointer);
                    }
                }
            }
        }
    }
}

/// [`TreeSearch`] adapter yielding `(key, payload)` pairs.
pub struct ElementSearch<'a, S: NodeStore, M: ElementMapper> {
    inner: TreeSearch<'a, S, M>,
}

impl<'a, S: NodeStore, M: ElementMapper> Iterator for ElementSearch<'a, S, M> {
    type Item = Result<(u64, M::Element)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(key) => Some(self.inner.tree.get(key).map(|e| (key, e))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Best-first queue item for nearest-neighbor traversal.
pub(crate) struct Candidate {
    pub dist: f64,
    pub target: Target,
}

pub(crate) enum Target {
    Subtree(u64),
    Element(u64),
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Reversed so that std's max-heap pops the closest candidate first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
    }
}
