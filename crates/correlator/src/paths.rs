//! Iterative path reconstruction over the parent-pointer graph.
//!
//! Parents are plain integer keys, never owning pointers: the directory
//! graph on a real (or tampered) volume can contain cycles, so the walk
//! carries a visited set and memoizes per volume. The function is pure
//! over the index: identical indexes produce identical strings.

use ahash::AHashMap;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Root directory record number on every NTFS volume.
const ROOT_RECORD: u64 = 5;

/// Reconstruction results memoized per volume.
const PATH_CACHE_CAPACITY: usize = 65_536;

/// One record's name and parent pointer, as the correlator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub filename: String,
    pub parent_record: u64,
}

/// Parent-pointer index for one volume, with a memo cache.
pub struct PathIndex {
    nodes: AHashMap<u64, PathNode>,
    cache: LruCache<u64, String>,
}

impl PathIndex {
    pub fn new(nodes: AHashMap<u64, PathNode>) -> Self {
        PathIndex {
            nodes,
            cache: LruCache::new(NonZeroUsize::new(PATH_CACHE_CAPACITY).expect("non-zero")),
        }
    }

    pub fn insert(&mut self, record: u64, node: PathNode) {
        self.nodes.insert(record, node);
    }

    /// Reconstruct the path of `record`. Walks parent pointers
    /// iteratively; stops at the root, on a cycle, or at a missing
    /// parent (which terminates the path with an `[Unknown Parent: N]`
    /// sentinel).
    pub fn reconstruct(&mut self, record: u64) -> String {
        if let Some(cached) = self.cache.get(&record) {
            return cached.clone();
        }

        let mut parts: Vec<String> = Vec::new();
        let mut visited: Vec<u64> = Vec::new();
        let mut current = record;

        loop {
            if current == 0 {
                break;
            }
            if visited.contains(&current) {
                // Cycle: close the path with a sentinel naming the
                // revisited record rather than walking forever.
                parts.push(format!("[Unknown Parent: {current}]"));
                break;
            }
            visited.push(current);

            match self.nodes.get(&current) {
                Some(node) => {
                    if !node.filename.is_empty() {
                        parts.push(node.filename.clone());
                    }
                    if node.parent_record == current || node.parent_record == 0 {
                        break;
                    }
                    current = node.parent_record;
                }
                None => {
                    parts.push(format!("[Unknown Parent: {current}]"));
                    break;
                }
            }
        }

        let path = if parts.is_empty() {
            if record == ROOT_RECORD {
                "./".to_string()
            } else {
                "[Unknown]".to_string()
            }
        } else {
            parts.reverse();
            parts.join("/")
        };

        self.cache.put(record, path.clone());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(entries: &[(u64, &str, u64)]) -> PathIndex {
        let mut nodes = AHashMap::new();
        for (record, name, parent) in entries {
            nodes.insert(
                *record,
                PathNode {
                    filename: (*name).to_string(),
                    parent_record: *parent,
                },
            );
        }
        PathIndex::new(nodes)
    }

    #[test]
    fn walks_to_root() {
        let mut idx = index(&[
            (5, ".", 5),
            (10, "Users", 5),
            (20, "kim", 10),
            (30, "notes.txt", 20),
        ]);
        assert_eq!(idx.reconstruct(30), "./Users/kim/notes.txt");
    }

    #[test]
    fn root_with_no_parts_is_dot_slash() {
        let mut idx = index(&[(5, "", 5)]);
        assert_eq!(idx.reconstruct(5), "./");
    }

    #[test]
    fn unknown_record_is_unknown() {
        let mut idx = index(&[]);
        // A record absent from the index yields the sentinel terminal.
        assert_eq!(idx.reconstruct(99), "[Unknown Parent: 99]");
    }

    #[test]
    fn missing_parent_emits_sentinel() {
        let mut idx = index(&[(30, "stranded.txt", 777)]);
        assert_eq!(
            idx.reconstruct(30),
            "[Unknown Parent: 777]/stranded.txt"
        );
    }

    #[test]
    fn cycle_terminates_with_sentinel() {
        let mut idx = index(&[(10, "a", 20), (20, "b", 30), (30, "c", 10)]);
        let path = idx.reconstruct(10);
        // At most one node per record, closed by the sentinel.
        assert_eq!(path, "[Unknown Parent: 10]/c/b/a");
        assert_eq!(path.matches('a').count(), 2); // "a" and "Parent"
    }

    #[test]
    fn reconstruction_is_pure_and_memoized() {
        let mut idx = index(&[(5, ".", 5), (10, "dir", 5), (30, "f.txt", 10)]);
        let first = idx.reconstruct(30);
        let second = idx.reconstruct(30);
        assert_eq!(first, second);

        let mut fresh = index(&[(5, ".", 5), (10, "dir", 5), (30, "f.txt", 10)]);
        assert_eq!(fresh.reconstruct(30), first);
    }
}
