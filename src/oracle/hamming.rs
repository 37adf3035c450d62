//! Hamming-distance oracle backed by a BK-tree.

use std::sync::{Arc, RwLock};

use super::{Oracle, OracleFactory};

/// Number of bits that differ between two fingerprints.
#[must_use]
pub const fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

#[derive(Debug)]
struct Node {
    fingerprint: u64,
    /// `(distance to this node, child index)` pairs.
    children: Vec<(u32, usize)>,
}

/// BK-tree over Hamming distance. Node 0 is the root.
#[derive(Debug, Default)]
struct BkTree {
    nodes: Vec<Node>,
}

impl BkTree {
    fn insert(&mut self, fingerprint: u64) {
        if self.nodes.is_empty() {
            self.nodes.push(Node {
                fingerprint,
                children: Vec::new(),
            });
            return;
        }

        let mut current = 0;
        loop {
            let distance = hamming_distance(self.nodes[current].fingerprint, fingerprint);
            if distance == 0 {
                return;
            }
            let child = self.nodes[current]
                .children
                .iter()
                .find(|(d, _)| *d == distance)
                .map(|(_, idx)| *idx);
            match child {
                Some(idx) => current = idx,
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(Node {
                        fingerprint,
                        children: Vec::new(),
                    });
                    self.nodes[current].children.push((distance, idx));
                    return;
                },
            }
        }
    }

    fn contains_within(&self, fingerprint: u64, tolerance: u32) -> bool {
        if self.nodes.is_empty() {
            return false;
        }

        let mut pending = vec![0usize];
        while let Some(current) = pending.pop() {
            let node = &self.nodes[current];
            let distance = hamming_distance(node.fingerprint, fingerprint);
            if distance <= tolerance {
                return true;
            }
            // Triangle inequality: only subtrees at |d - child_d| <= tolerance can match.
            let low = distance.saturating_sub(tolerance);
            let high = distance + tolerance;
            pending.extend(
                node.children
                    .iter()
                    .filter(|(d, _)| (low..=high).contains(d))
                    .map(|(_, idx)| *idx),
            );
        }
        false
    }
}

/// Oracle answering "is there a recorded fingerprint within `tolerance`
/// bits of this one?".
///
/// # Lock Poisoning
///
/// A poisoned lock is treated as empty for queries and skipped for
/// records. Missing a near-duplicate only means content is processed twice.
#[derive(Debug, Default)]
pub struct HammingOracle {
    tree: RwLock<BkTree>,
}

impl HammingOracle {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of distinct fingerprints recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.read().map(|t| t.nodes.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Oracle for HammingOracle {
    fn record(&self, fingerprint: u64) {
        if let Ok(mut tree) = self.tree.write() {
            tree.insert(fingerprint);
        } else {
            tracing::warn!("Hamming oracle lock poisoned, dropping fingerprint");
        }
    }

    fn is_near(&self, fingerprint: u64, tolerance: u8) -> bool {
        self.tree
            .read()
            .map(|tree| tree.contains_within(fingerprint, u32::from(tolerance)))
            .unwrap_or(false)
    }
}

/// Factory producing a fresh [`HammingOracle`] per key.
#[derive(Debug, Clone, Copy, Default)]
pub struct HammingOracleFactory;

impl OracleFactory for HammingOracleFactory {
    fn create(&self, _key: &str) -> Arc<dyn Oracle> {
        Arc::new(HammingOracle::new())
    }
}
