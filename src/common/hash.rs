//! Hashing utilities for meshcache
//!
//! - BLAKE3-derived u64 points for ring placement
//! - Consistent hash ring with virtual nodes for key ownership

/// Hash bytes to a u64 ring position (first 8 bytes of BLAKE3, little endian)
pub fn ring_hash(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(head)
}

/// Consistent hash ring
///
/// Each node contributes `replicas` virtual points. A key belongs to the
/// node owning the first point at or after the key's hash, wrapping around.
/// Adding or removing a node only moves the keys adjacent to its points.
///
/// The ring is immutable once built; membership changes build a new one.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    /// Sorted (point, node index)
    points: Vec<(u64, usize)>,
    nodes: Vec<String>,
}

impl ConsistentHashRing {
    /// Build a ring over `nodes`. Duplicate names are collapsed.
    pub fn new<I, S>(replicas: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut nodes: Vec<String> = nodes.into_iter().map(Into::into).collect();
        nodes.sort();
        nodes.dedup();

        let replicas = replicas.max(1);
        let mut points = Vec::with_capacity(nodes.len() * replicas);
        for (idx, node) in nodes.iter().enumerate() {
            for i in 0..replicas {
                let point = ring_hash(format!("{}{}", i, node).as_bytes());
                points.push((point, idx));
            }
        }
        // Ties are broken by node name so every node builds the same ring
        points.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| nodes[a.1].cmp(&nodes[b.1])));

        Self { points, nodes }
    }

    /// An empty ring
    pub fn empty() -> Self {
        Self {
            points: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes on the ring, sorted
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Node responsible for a key, `None` if the ring is empty
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = ring_hash(key.as_bytes());
        let idx = self.points.partition_point(|(point, _)| *point < hash);
        let (_, node) = self.points[idx % self.points.len()];
        Some(self.nodes[node].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ring_hash_deterministic() {
        assert_eq!(ring_hash(b"42"), ring_hash(b"42"));
        assert_ne!(ring_hash(b"42"), ring_hash(b"43"));
    }

    #[test]
    fn test_empty_ring() {
        let ring = ConsistentHashRing::empty();
        assert!(ring.is_empty());
        assert_eq!(ring.get("key"), None);
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = ConsistentHashRing::new(50, nodes(&["node1"]));
        for i in 0..100 {
            assert_eq!(ring.get(&format!("key-{}", i)), Some("node1"));
        }
    }

    #[test]
    fn test_enumeration_order_irrelevant() {
        let a = ConsistentHashRing::new(50, nodes(&["node1", "node2", "node3"]));
        let b = ConsistentHashRing::new(50, nodes(&["node3", "node1", "node2"]));
        for i in 0..500 {
            let key = format!("key-{}", i);
            assert_eq!(a.get(&key), b.get(&key));
        }
    }

    #[test]
    fn test_duplicates_collapsed() {
        let ring = ConsistentHashRing::new(10, nodes(&["node1", "node1", "node2"]));
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_all_nodes_receive_keys() {
        let ring = ConsistentHashRing::new(50, nodes(&["node1", "node2", "node3"]));
        let mut seen = std::collections::HashSet::new();
        for i in 0..1000 {
            seen.insert(ring.get(&format!("key-{}", i)).unwrap().to_string());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_removal_only_moves_removed_nodes_keys() {
        let before = ConsistentHashRing::new(50, nodes(&["node1", "node2", "node3", "node4"]));
        let after = ConsistentHashRing::new(50, nodes(&["node1", "node2", "node4"]));

        let mut moved = 0;
        let total = 2000;
        for i in 0..total {
            let key = format!("key-{}", i);
            let old = before.get(&key).unwrap();
            let new = after.get(&key).unwrap();
            if old != "node3" {
                assert_eq!(old, new, "key {} moved off a surviving node", key);
            } else {
                assert_ne!(new, "node3");
                moved += 1;
            }
        }
        // Only node3's share moved, well under all keys
        assert!(moved < total / 2, "moved {} of {}", moved, total);
    }
}
