//! Bounded recency cache.
//!
//! Entries live in a slab of nodes linked into a doubly linked recency list;
//! a `HashMap` maps each key to its slot.
//!
//! ```text
//! head (MRU) ⇄ node ⇄ node ⇄ ... ⇄ tail (LRU)
//! ```
//!
//! Not internally synchronized.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

struct Node<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// A least-recently-used cache. A capacity of `0` means unbounded.
pub struct LruCache<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace `key`, making it the most recent entry.
    ///
    /// Returns the evicted entry when a new key pushed the cache past its
    /// capacity. Replacing an existing key never evicts.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.node_mut(slot).value = value;
            self.promote(slot);
            return None;
        }

        let evicted = if self.capacity != 0 && self.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let node = Node {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
        evicted
    }

    /// Look up `key`, promoting it to most recent.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        Some(&self.node(slot).value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let slot = *self.index.get(key)?;
        self.promote(slot);
        Some(&mut self.node_mut(slot).value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        Some(&self.node(slot).value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.release(slot).map(|(_, value)| value)
    }

    /// Remove and return the least recently used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let slot = self.tail;
        self.unlink(slot);
        let (key, value) = self.release(slot)?;
        self.index.remove(&key);
        Some((key, value))
    }

    /// Change the capacity, evicting from the tail until the cache fits.
    /// Returns the evicted entries, least recent first.
    pub fn resize(&mut self, capacity: usize) -> Vec<(K, V)> {
        self.capacity = capacity;
        let mut evicted = Vec::new();
        while capacity != 0 && self.len() > capacity {
            match self.pop_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Entries from most to least recently used.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            cursor: self.head,
            remaining: self.len(),
        }
    }

    // -- list plumbing ------------------------------------------------------

    fn node(&self, slot: usize) -> &Node<K, V> {
        self.slots[slot]
            .as_ref()
            .unwrap_or_else(|| unreachable!("indexed slot {slot} is vacant"))
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K, V> {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("indexed slot {slot} is vacant"))
    }

    fn release(&mut self, slot: usize) -> Option<(K, V)> {
        let node = self.slots[slot].take()?;
        self.free.push(slot);
        Some((node.key, node.value))
    }

    fn promote(&mut self, slot: usize) {
        if self.head != slot {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.node_mut(old_head).prev = slot;
        } else {
            self.tail = slot;
        }
        self.head = slot;
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };
        if prev != NIL {
            self.node_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.node_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
        let node = self.node_mut(slot);
        node.prev = NIL;
        node.next = NIL;
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("keys", &self.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over a cache from most to least recently used.
pub struct Iter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    cursor: usize,
    remaining: usize,
}

impl<'a, K: Hash + Eq + Clone, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let node = self.cache.node(self.cursor);
        self.cursor = node.next;
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: Hash + Eq + Clone, V> ExactSizeIterator for Iter<'_, K, V> {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn keys<V>(cache: &LruCache<&'static str, V>) -> Vec<&'static str> {
        cache.iter().map(|(k, _)| *k).collect()
    }

    #[test]
    fn evicts_least_recent() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        let evicted = cache.put("c", 3);
        assert_eq!(evicted, Some(("a", 1)));
        assert!(!cache.contains(&"a"));
        assert_eq!(keys(&cache), vec!["c", "b"]);
    }

    #[test]
    fn get_protects_oldest() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.put("c", 3);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
    }

    #[test]
    fn peek_does_not_promote() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.peek(&"a"), Some(&1));
        cache.put("c", 3);
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn replacing_existing_key_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.put("a", 10), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(keys(&cache), vec!["a", "b"]);
        assert_eq!(cache.peek(&"a"), Some(&10));
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let mut cache = LruCache::new(0);
        for i in 0..100 {
            assert_eq!(cache.put(i, i), None);
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn resize_evicts_tail() {
        let mut cache = LruCache::new(0);
        for k in ["a", "b", "c", "d"] {
            cache.put(k, ());
        }
        let evicted: Vec<_> = cache.resize(2).into_iter().map(|(k, _)| k).collect();
        assert_eq!(evicted, vec!["a", "b"]);
        assert_eq!(keys(&cache), vec!["d", "c"]);
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn remove_and_reuse_slots() {
        let mut cache = LruCache::new(3);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);
        cache.put("c", 3);
        if let Some(v) = cache.get_mut(&"b") {
            *v = 20;
        }
        assert_eq!(keys(&cache), vec!["b", "c"]);
        assert_eq!(cache.peek(&"b"), Some(&20));
        assert_eq!(cache.slots.len(), 2);
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity(
            capacity in 1usize..8,
            ops in proptest::collection::vec((0u8..16, any::<bool>()), 0..200),
        ) {
            let mut cache = LruCache::new(capacity);
            for (key, read) in ops {
                if read {
                    cache.get(&key);
                } else {
                    cache.put(key, key);
                }
                prop_assert!(cache.len() <= capacity);
                prop_assert_eq!(cache.iter().count(), cache.len());
            }
        }
    }
}
