//! Byte-bounded LRU store.
//!
//! Recency is kept in a doubly-linked list whose nodes live in a slab and refer to each other by index. The head of
//! the list is the most recently used entry, the tail is the next eviction victim.

use crate::traits::ValueSize;
use std::collections::HashMap;

const NIL: usize = usize::MAX;

struct Node<V> {
    key:   String,
    value: V,
    prev:  usize,
    next:  usize,
}

/// The store is not synchronized. [`MainCache`](crate::cache::MainCache) is what guards it for concurrent use.
pub struct LruStore<V>
where
    V: ValueSize,
{
    // 0 means no limit.
    max_bytes: u64,
    nbytes:    u64,
    slots:     Vec<Option<Node<V>>>,
    free:      Vec<usize>,
    index:     HashMap<String, usize>,
    head:      usize,
    tail:      usize,
}

impl<V> LruStore<V>
where
    V: ValueSize,
{
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            nbytes: 0,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
        }
    }

    #[inline]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Bytes currently accounted for: the sum of key lengths and value sizes of all entries.
    #[inline]
    pub fn nbytes(&self) -> u64 {
        self.nbytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Membership test that doesn't touch recency.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up a key and marks it as the most recently used one.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        Some(&self.node(idx).value)
    }

    /// Inserts or replaces a value, then evicts least recently used entries until the store fits its budget again.
    /// Returns what was evicted, oldest first.
    pub fn add(&mut self, key: impl Into<String>, value: V) -> Vec<(String, V)> {
        let key = key.into();

        if let Some(&idx) = self.index.get(&key) {
            let node = self.node_mut(idx);
            let new_size = value.size() as u64;
            let old_value = std::mem::replace(&mut node.value, value);
            // The key is already accounted for, only the value delta matters.
            self.nbytes = self.nbytes + new_size - old_value.size() as u64;
            self.move_to_front(idx);
        }
        else {
            self.nbytes += (key.len() + value.size()) as u64;
            let idx = self.alloc(Node {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            self.index.insert(key, idx);
            self.push_front(idx);
        }

        let mut evicted = Vec::new();
        while self.max_bytes != 0 && self.nbytes > self.max_bytes {
            match self.remove_oldest() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Removes the least recently used entry.
    pub fn remove_oldest(&mut self) -> Option<(String, V)> {
        if self.tail == NIL {
            return None;
        }

        let idx = self.tail;
        self.detach(idx);
        let node = self.slots[idx]
            .take()
            .expect("Internal error: LRU tail points to an empty slot");
        self.free.push(idx);
        self.index.remove(&node.key);
        self.nbytes -= (node.key.len() + node.value.size()) as u64;

        Some((node.key, node.value))
    }

    /// Keys from the most to the least recently used.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.len());
        let mut idx = self.head;
        while idx != NIL {
            let node = self.node(idx);
            keys.push(node.key.as_str());
            idx = node.next;
        }
        keys
    }

    fn alloc(&mut self, node: Node<V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(node);
            idx
        }
        else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }

    #[inline(always)]
    fn node(&self, idx: usize) -> &Node<V> {
        self.slots[idx]
            .as_ref()
            .expect("Internal error: LRU list refers to an empty slot")
    }

    #[inline(always)]
    fn node_mut(&mut self, idx: usize) -> &mut Node<V> {
        self.slots[idx]
            .as_mut()
            .expect("Internal error: LRU list refers to an empty slot")
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.node(idx);
            (node.prev, node.next)
        };

        if prev == NIL {
            self.head = next;
        }
        else {
            self.node_mut(prev).next = next;
        }

        if next == NIL {
            self.tail = prev;
        }
        else {
            self.node_mut(next).prev = prev;
        }

        let node = self.node_mut(idx);
        node.prev = NIL;
        node.next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(idx);
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head == NIL {
            self.tail = idx;
        }
        else {
            self.node_mut(old_head).prev = idx;
        }
        self.head = idx;
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head != idx {
            self.detach(idx);
            self.push_front(idx);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    impl ValueSize for String {
        fn size(&self) -> usize {
            self.len()
        }
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn get_hit_and_miss() {
        let mut lru = LruStore::new(0);
        lru.add("key1", s("1234"));
        assert_eq!(lru.get("key1").map(String::as_str), Some("1234"));
        assert!(lru.get("key2").is_none());
        assert_eq!(lru.nbytes(), 8);
    }

    #[test]
    fn evicts_in_insertion_order() {
        let (k1, k2, k3) = ("key1", "key2", "k3");
        let (v1, v2, v3) = ("value1", "value2", "v3");
        let cap = (k1.len() + k2.len() + v1.len() + v2.len()) as u64;
        let mut lru = LruStore::new(cap);

        assert!(lru.add(k1, s(v1)).is_empty());
        assert!(lru.add(k2, s(v2)).is_empty());
        let evicted = lru.add(k3, s(v3));

        assert_eq!(evicted, vec![(s(k1), s(v1))]);
        assert!(!lru.contains(k1));
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.keys(), vec![k3, k2]);
    }

    #[test]
    fn read_protects_from_eviction() {
        let mut lru = LruStore::new(12);
        lru.add("a", s("11111"));
        lru.add("b", s("22222"));
        assert!(lru.get("a").is_some());

        let evicted = lru.add("c", s("33333"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "b");
        assert!(lru.contains("a"));
        assert!(lru.contains("c"));
    }

    #[test]
    fn replace_adjusts_size_by_value_delta() {
        let mut lru = LruStore::new(0);
        lru.add("key", s("12"));
        lru.add("other", s("x"));
        assert_eq!(lru.nbytes(), 11);

        lru.add("key", s("123456"));
        assert_eq!(lru.nbytes(), 15);
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.keys(), vec!["key", "other"]);

        lru.add("key", s(""));
        assert_eq!(lru.nbytes(), 9);
    }

    #[test]
    fn budget_holds_after_every_add() {
        let mut lru = LruStore::new(64);
        for i in 0..500 {
            let key = format!("k{}", i % 37);
            let value = "x".repeat(i % 23);
            lru.add(key, value);
            assert!(lru.nbytes() <= 64, "nbytes {} over budget after add #{i}", lru.nbytes());
        }

        let total: u64 = lru
            .keys()
            .iter()
            .map(|k| (k.len() + lru.slots[lru.index[*k]].as_ref().unwrap().value.len()) as u64)
            .sum();
        assert_eq!(total, lru.nbytes());
    }

    #[test]
    fn oversized_entry_is_dropped_right_away() {
        let mut lru = LruStore::new(4);
        lru.add("a", s("1"));
        let evicted = lru.add("big", s("0123456789"));
        assert_eq!(evicted.len(), 2);
        assert!(lru.is_empty());
        assert_eq!(lru.nbytes(), 0);
        assert!(lru.remove_oldest().is_none());

        // Slots are recycled.
        lru.add("b", s("2"));
        assert_eq!(lru.slots.len(), 2);
        assert_eq!(lru.keys(), vec!["b"]);
    }
}
