//! Bounded least-recently-used cache.
//!
//! Entries live in a slab of nodes linked into an intrusive recency list, with a
//! `HashMap` from key to slot. Every operation is O(1); a hit on `get` relinks
//! the node at the most-recent end. Stored values are opaque, so an "empty"
//! value (e.g., `String::new()`) is distinct from an absent key.

use std::{collections::HashMap, hash::Hash};

use anyhow::anyhow;

use super::types::Res;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A fixed-capacity cache that evicts the least-recently-used entry.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Least recently used.
    head: Option<usize>,
    /// Most recently used.
    tail: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// Fails when `capacity` is zero.
    pub fn new(capacity: usize) -> Res<Self> {
        if capacity == 0 {
            return Err(anyhow!("LRU cache capacity must be greater than zero."));
        }

        Ok(Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.map.get(key)?;
        self.touch(slot);
        self.nodes[slot].as_ref().map(|node| &node.value)
    }

    /// Insert or update `key`, marking it most-recently-used.
    ///
    /// When `key` is new and the cache is full, exactly one entry (the least
    /// recently used) is evicted first.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(&slot) = self.map.get(&key) {
            if let Some(node) = self.nodes[slot].as_mut() {
                node.value = value;
            }
            self.touch(slot);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_oldest();
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        self.map.insert(key, slot);
        self.push_back(slot);
    }

    /// Whether `key` is present. Does not affect recency.
    pub fn has(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&mut self, key: &K) -> bool {
        match self.map.remove(key) {
            Some(slot) => {
                self.unlink(slot);
                self.nodes[slot] = None;
                self.free.push(slot);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys ordered from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;

        while let Some(slot) = cursor {
            match self.nodes[slot].as_ref() {
                Some(node) => {
                    keys.push(node.key.clone());
                    cursor = node.next;
                }
                None => break,
            }
        }

        keys
    }

    fn evict_oldest(&mut self) {
        if let Some(slot) = self.head {
            self.unlink(slot);
            if let Some(node) = self.nodes[slot].take() {
                self.map.remove(&node.key);
            }
            self.free.push(slot);
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_back(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.nodes[slot].as_mut() {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;

        if let Some(node) = self.nodes[slot].as_mut() {
            node.prev = old_tail;
            node.next = None;
        }

        match old_tail {
            Some(t) => {
                if let Some(node) = self.nodes[t].as_mut() {
                    node.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }

        self.tail = Some(slot);
    }
}

// Tests.
