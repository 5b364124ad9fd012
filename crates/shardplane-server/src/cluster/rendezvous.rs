//! Rendezvous Hashing (Highest Random Weight)
//!
//! Every candidate node scores the key; the highest score wins. Adding or
//! removing a node only moves the keys that node wins or used to win.
//!
//! Score layout (stable across releases, placement depends on it):
//!
//! ```text
//! blake3( seed as u32 LE ‖ node_id bytes ‖ 0x00 ‖ key bytes )[0..4] as u32 LE
//! ```
//!
//! The zero byte keeps `("ab", "c")` and `("a", "bc")` apart. Ties go to the
//! node inserted first.

use shardplane_core::ClusterError;

/// Score of `node_id` for `key` under `seed`.
pub fn hash_function(seed: u32, node_id: &str, key: &str) -> u32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(node_id.as_bytes());
    hasher.update(&[0u8]);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[derive(Debug, Clone, Default)]
pub struct RendezvousHash {
    seed: u32,
    /// Insertion order, significant for ties
    nodes: Vec<String>,
}

impl RendezvousHash {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            nodes: Vec::new(),
        }
    }

    pub fn with_nodes<I, S>(seed: u32, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::new(seed);
        for node in nodes {
            ring.add_node(node);
        }
        ring
    }

    /// Add a candidate. Adding a known id keeps its original position.
    pub fn add_node(&mut self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        if !self.nodes.contains(&node_id) {
            self.nodes.push(node_id);
        }
    }

    pub fn remove_node(&mut self, node_id: &str) -> Result<(), ClusterError> {
        match self.nodes.iter().position(|n| n == node_id) {
            Some(idx) => {
                self.nodes.remove(idx);
                Ok(())
            }
            None => Err(ClusterError::not_found("hash ring node", node_id)),
        }
    }

    /// The node owning `key`, `None` on an empty ring.
    pub fn find_node(&self, key: &str) -> Option<&str> {
        let mut winner: Option<(&str, u32)> = None;
        for node in &self.nodes {
            let score = hash_function(self.seed, node, key);
            match winner {
                Some((_, best)) if score <= best => {}
                _ => winner = Some((node, score)),
            }
        }
        winner.map(|(node, _)| node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn node_ids(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("node-{i}")).collect()
    }

    fn assignments(ring: &RendezvousHash, keys: usize) -> HashMap<String, String> {
        (0..keys)
            .map(|i| {
                let key = format!("shard-{i}");
                let owner = ring.find_node(&key).map(str::to_string).unwrap_or_default();
                (key, owner)
            })
            .collect()
    }

    #[test]
    fn test_empty_returns_none() {
        let ring = RendezvousHash::new(0);
        assert!(ring.find_node("any-key").is_none());
    }

    #[test]
    fn test_single_node_owns_all() {
        let ring = RendezvousHash::with_nodes(0, ["only"]);
        for i in 0..100 {
            assert_eq!(ring.find_node(&format!("shard-{i}")), Some("only"));
        }
    }

    #[test]
    fn test_deterministic() {
        let r1 = RendezvousHash::with_nodes(7, node_ids(0..5));
        let r2 = RendezvousHash::with_nodes(7, node_ids(0..5));
        for i in 0..100 {
            let key = format!("shard-{i}");
            assert_eq!(r1.find_node(&key), r1.find_node(&key));
            assert_eq!(r1.find_node(&key), r2.find_node(&key));
        }
    }

    #[test]
    fn test_hash_function_is_stable() {
        assert_eq!(hash_function(0, "node-a", "key"), hash_function(0, "node-a", "key"));
        assert_ne!(hash_function(0, "ab", "c"), hash_function(0, "a", "bc"));
        assert_ne!(hash_function(0, "node-a", "key"), hash_function(1, "node-a", "key"));
    }

    #[test]
    fn test_even_distribution() {
        let nodes = node_ids(0..4);
        let ring = RendezvousHash::with_nodes(0, nodes.clone());
        let mut counts: HashMap<String, usize> = HashMap::new();
        let num_keys = 10_000;

        for owner in assignments(&ring, num_keys).into_values() {
            *counts.entry(owner).or_default() += 1;
        }

        // Each node should get ~25% (allow 10% deviation)
        let expected = num_keys / 4;
        let tolerance = expected / 10;
        for node in &nodes {
            let count = counts.get(node).copied().unwrap_or(0);
            let diff = (count as i64 - expected as i64).unsigned_abs() as usize;
            assert!(diff < tolerance, "{node}: got {count}, expected ~{expected}");
        }
    }

    #[test]
    fn test_growth_moves_only_to_new_nodes() {
        let keys = 10_000;
        let (n, k) = (5, 2);
        let mut ring = RendezvousHash::with_nodes(0, node_ids(0..n));
        let before = assignments(&ring, keys);

        for node in node_ids(n..n + k) {
            ring.add_node(node);
        }
        let after = assignments(&ring, keys);
        let new_nodes = node_ids(n..n + k);

        let mut moved = 0;
        for (key, old_owner) in &before {
            let new_owner = &after[key];
            if new_owner != old_owner {
                moved += 1;
                assert!(new_nodes.contains(new_owner), "{key} moved to an old node");
            }
        }

        let expected = keys as f64 * k as f64 / (n + k) as f64;
        let ratio = moved as f64 / expected;
        assert!((0.9..1.1).contains(&ratio), "moved {moved}, expected ~{expected:.0}");
    }

    #[test]
    fn test_shrink_then_regrow_restores_assignments() {
        let mut ring = RendezvousHash::with_nodes(3, node_ids(0..6));
        let before = assignments(&ring, 2_000);

        ring.remove_node("node-2").unwrap();
        ring.remove_node("node-4").unwrap();
        let shrunk = assignments(&ring, 2_000);
        for (key, owner) in &shrunk {
            if before[key] != "node-2" && before[key] != "node-4" {
                assert_eq!(owner, &before[key]);
            }
        }

        ring.add_node("node-2");
        ring.add_node("node-4");
        assert_eq!(assignments(&ring, 2_000), before);
    }

    #[test]
    fn test_remove_unknown_is_not_found() {
        let mut ring = RendezvousHash::with_nodes(0, ["a"]);
        assert!(matches!(
            ring.remove_node("b"),
            Err(ClusterError::NotFound { .. })
        ));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_duplicate_add_keeps_position() {
        let mut ring = RendezvousHash::with_nodes(0, ["a", "b"]);
        ring.add_node("a");
        assert_eq!(ring.nodes(), &["a".to_string(), "b".to_string()]);
    }
}
