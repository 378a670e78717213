//! Entry Store and Recency List
//!
//! The store maps each key to the most recent write for it, and threads every
//! live entry onto a doubly linked recency list ordered by write time.
//!
//! ## Layout
//!
//! ```text
//!   index: HashMap<String, usize>          nodes: Vec<Option<Node>>
//!   ┌──────────┬─────┐                     ┌─────┬─────┬─────┬─────┐
//!   │ "a"      │  2  │────────────────────>│  0  │  1  │  2  │  3  │
//!   │ "b"      │  0  │                     └─────┴─────┴─────┴─────┘
//!   └──────────┴─────┘
//!
//!   tail (oldest)                                          head (newest)
//!      0  <──prev── next──>  3  <──prev── next──>  2
//! ```
//!
//! Links are arena indices, not references. A removed node's slot goes onto
//! a free list and is reused by the next insert.
//!
//! The chain is kept sorted by `created_at` from tail to head. Live writes
//! always land at the head in O(1). A write carrying an older timestamp
//! (replayed from the log) is walked back from the head to its age position,
//! so the expiry sweep can stop at the first entry that is still live.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// One live key's current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The key this entry is stored under
    pub key: String,
    /// Identifier assigned when the write was accepted
    pub write_id: Uuid,
    /// Logical write time (the request time, or the replayed log time)
    pub created_at: DateTime<Utc>,
    /// The stored value
    pub value: Value,
}

impl Entry {
    pub fn new(key: impl Into<String>, write_id: Uuid, created_at: DateTime<Utc>, value: Value) -> Self {
        Self {
            key: key.into(),
            write_id,
            created_at,
            value,
        }
    }

    /// Age of the entry at `now`. Negative if `created_at` is in the future.
    #[inline]
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.created_at)
    }

    /// An entry is expired once its age reaches the TTL.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        self.age(now) >= ttl
    }
}

/// A slot in the arena: the entry plus its recency links.
#[derive(Debug)]
struct Node {
    entry: Entry,
    /// Toward the tail (older)
    prev: Option<usize>,
    /// Toward the head (newer)
    next: Option<usize>,
}

/// Key table plus recency list. Not synchronized; the engine wraps it in its lock.
#[derive(Debug, Default)]
pub struct EntryStore {
    index: HashMap<String, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    /// Newest entry
    head: Option<usize>,
    /// Oldest entry
    tail: Option<usize>,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the live entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.index.get(key).map(|&idx| &self.node(idx).entry)
    }

    /// Inserts `entry`, replacing and unlinking any previous entry for its key.
    ///
    /// Returns the replaced entry.
    pub fn insert(&mut self, entry: Entry) -> Option<Entry> {
        let replaced = self.remove(&entry.key);

        let key = entry.key.clone();
        let idx = self.allocate(Node {
            entry,
            prev: None,
            next: None,
        });
        self.link_by_age(idx);
        self.index.insert(key, idx);

        replaced
    }

    /// Removes the entry for `key` from wherever it sits in the chain.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let idx = self.index.remove(key)?;
        Some(self.unlink_and_free(idx))
    }

    /// Pops entries from the tail while they are expired at `now`.
    ///
    /// Stops at the first entry still within `ttl`, or when the list is empty.
    pub fn pop_expired(&mut self, now: DateTime<Utc>, ttl: TimeDelta) -> Vec<Entry> {
        let mut evicted = Vec::new();

        while let Some(idx) = self.tail {
            if !self.node(idx).entry.is_expired(now, ttl) {
                break;
            }
            let key = self.node(idx).entry.key.clone();
            self.index.remove(&key);
            evicted.push(self.unlink_and_free(idx));
        }

        evicted
    }

    /// Iterates live entries from oldest (tail) to newest (head).
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            store: self,
            cursor: self.tail,
        }
    }

    /// Key of the newest entry.
    pub fn head_key(&self) -> Option<&str> {
        self.head.map(|idx| self.node(idx).entry.key.as_str())
    }

    /// Key of the oldest entry.
    pub fn tail_key(&self) -> Option<&str> {
        self.tail.map(|idx| self.node(idx).entry.key.as_str())
    }

    /// Number of arena slots, occupied or free.
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    // ========================================================================
    // Arena and link management
    // ========================================================================

    fn node(&self, idx: usize) -> &Node {
        match &self.nodes[idx] {
            Some(node) => node,
            None => unreachable!("recency list references vacant slot {}", idx),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        match &mut self.nodes[idx] {
            Some(node) => node,
            None => unreachable!("recency list references vacant slot {}", idx),
        }
    }

    fn allocate(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Links `idx` after the newest node not younger than it.
    fn link_by_age(&mut self, idx: usize) {
        let created_at = self.node(idx).entry.created_at;

        let mut after = self.head;
        while let Some(cur) = after {
            if self.node(cur).entry.created_at <= created_at {
                break;
            }
            after = self.node(cur).prev;
        }

        match after {
            Some(prev) => {
                let next = self.node(prev).next;
                {
                    let node = self.node_mut(idx);
                    node.prev = Some(prev);
                    node.next = next;
                }
                self.node_mut(prev).next = Some(idx);
                match next {
                    Some(next) => self.node_mut(next).prev = Some(idx),
                    None => self.head = Some(idx),
                }
            }
            None => {
                // Older than everything: becomes the new tail
                let next = self.tail;
                {
                    let node = self.node_mut(idx);
                    node.prev = None;
                    node.next = next;
                }
                match next {
                    Some(next) => self.node_mut(next).prev = Some(idx),
                    None => self.head = Some(idx),
                }
                self.tail = Some(idx);
            }
        }
    }

    /// Re-stitches the neighbours of `idx`, then frees its slot.
    ///
    /// The caller must already have removed the key from `index`.
    fn unlink_and_free(&mut self, idx: usize) -> Entry {
        let node = match self.nodes[idx].take() {
            Some(node) => node,
            None => unreachable!("unlinking vacant slot {}", idx),
        };

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.tail = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.head = node.prev,
        }

        self.free.push(idx);
        node.entry
    }
}

/// Iterator over live entries from tail to head.
pub struct Iter<'a> {
    store: &'a EntryStore,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let node = self.store.node(idx);
        self.cursor = node.next;
        Some(&node.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn entry(key: &str, secs: i64, value: Value) -> Entry {
        Entry::new(key, Uuid::new_v4(), at(secs), value)
    }

    fn keys(store: &EntryStore) -> Vec<String> {
        store.iter().map(|e| e.key.clone()).collect()
    }

    /// Walks the chain head to tail via `prev` links.
    fn keys_reversed(store: &EntryStore) -> Vec<String> {
        let mut out = Vec::new();
        let mut cursor = store.head;
        while let Some(idx) = cursor {
            let node = store.node(idx);
            out.push(node.entry.key.clone());
            cursor = node.prev;
        }
        out
    }

    /// Both directions agree, every indexed key is linked exactly once, and
    /// the chain is sorted by age.
    fn assert_consistent(store: &EntryStore) {
        let forward = keys(store);
        let mut backward = keys_reversed(store);
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), store.len());
        for key in &forward {
            assert!(store.contains_key(key));
        }

        let times: Vec<_> = store.iter().map(|e| e.created_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_get_absent() {
        let store = EntryStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
        assert_eq!(store.head_key(), None);
        assert_eq!(store.tail_key(), None);
    }

    #[test]
    fn test_insert_links_at_head() {
        let mut store = EntryStore::new();
        store.insert(entry("a", 0, json!(1)));
        store.insert(entry("b", 1, json!(2)));
        store.insert(entry("c", 2, json!(3)));

        assert_eq!(keys(&store), vec!["a", "b", "c"]);
        assert_eq!(store.tail_key(), Some("a"));
        assert_eq!(store.head_key(), Some("c"));
        assert_consistent(&store);
    }

    #[test]
    fn test_replace_moves_to_head() {
        let mut store = EntryStore::new();
        store.insert(entry("k", 0, json!("v1")));
        store.insert(entry("other", 1, json!(0)));

        let replaced = store.insert(entry("k", 2, json!("v2")));
        assert_eq!(replaced.map(|e| e.value), Some(json!("v1")));

        assert_eq!(store.get("k").map(|e| &e.value), Some(&json!("v2")));
        assert_eq!(store.len(), 2);
        assert_eq!(keys(&store), vec!["other", "k"]);
        assert_eq!(store.head_key(), Some("k"));
        assert_consistent(&store);
    }

    #[test]
    fn test_remove_middle() {
        let mut store = EntryStore::new();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            store.insert(entry(key, i as i64, json!(i)));
        }

        let removed = store.remove("b").unwrap();
        assert_eq!(removed.key, "b");
        assert_eq!(keys(&store), vec!["a", "c"]);
        assert_eq!(keys_reversed(&store), vec!["c", "a"]);
        assert_consistent(&store);
    }

    #[test]
    fn test_remove_endpoints() {
        let mut store = EntryStore::new();
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            store.insert(entry(key, i as i64, json!(i)));
        }

        store.remove("a");
        assert_eq!(store.tail_key(), Some("b"));
        store.remove("c");
        assert_eq!(store.head_key(), Some("b"));
        assert_eq!(store.tail_key(), Some("b"));
        store.remove("b");
        assert_eq!(store.head_key(), None);
        assert_eq!(store.tail_key(), None);
        assert!(store.is_empty());
        assert_consistent(&store);
    }

    #[test]
    fn test_remove_absent() {
        let mut store = EntryStore::new();
        store.insert(entry("a", 0, json!(1)));
        assert!(store.remove("b").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_backdated_insert_keeps_age_order() {
        let mut store = EntryStore::new();
        store.insert(entry("t10", 10, json!(1)));
        store.insert(entry("t20", 20, json!(2)));
        store.insert(entry("t30", 30, json!(3)));

        store.insert(entry("t15", 15, json!(4)));
        store.insert(entry("t5", 5, json!(5)));
        store.insert(entry("t20b", 20, json!(6)));

        assert_eq!(keys(&store), vec!["t5", "t10", "t15", "t20", "t20b", "t30"]);
        assert_eq!(store.tail_key(), Some("t5"));
        assert_eq!(store.head_key(), Some("t30"));
        assert_consistent(&store);
    }

    #[test]
    fn test_pop_expired_stops_at_first_live() {
        let mut store = EntryStore::new();
        store.insert(entry("old1", 0, json!(1)));
        store.insert(entry("old2", 1, json!(2)));
        store.insert(entry("fresh", 9, json!(3)));

        let ttl = TimeDelta::seconds(5);
        let evicted = store.pop_expired(at(10), ttl);

        let evicted: Vec<_> = evicted.into_iter().map(|e| e.key).collect();
        assert_eq!(evicted, vec!["old1", "old2"]);
        assert_eq!(keys(&store), vec!["fresh"]);
        assert!(store.get("old1").is_none());
        assert_consistent(&store);
    }

    #[test]
    fn test_pop_expired_at_exact_ttl() {
        let mut store = EntryStore::new();
        store.insert(entry("a", 0, json!(1)));

        let ttl = TimeDelta::seconds(2);
        assert!(store.pop_expired(at(1), ttl).is_empty());
        assert_eq!(store.pop_expired(at(2), ttl).len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_pop_expired_empty() {
        let mut store = EntryStore::new();
        assert!(store.pop_expired(at(100), TimeDelta::seconds(1)).is_empty());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut store = EntryStore::new();
        for i in 0..4 {
            store.insert(entry(&format!("k{}", i), i, json!(i)));
        }
        store.remove("k1");
        store.remove("k2");
        store.insert(entry("k4", 4, json!(4)));
        store.insert(entry("k5", 5, json!(5)));

        assert_eq!(store.capacity(), 4);
        assert_eq!(keys(&store), vec!["k0", "k3", "k4", "k5"]);
        assert_consistent(&store);
    }

    #[test]
    fn test_future_entry_is_not_expired() {
        let e = entry("a", 100, json!(null));
        assert!(!e.is_expired(at(0), TimeDelta::seconds(1)));
        assert!(e.age(at(0)) < TimeDelta::zero());
    }
}
