//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.
//!
//! The tracker is the single serialization point of the cache: every
//! eviction decision is made under its lock, and it is the source of truth
//! for which keys are live and how many there are.

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;
use parking_lot::Mutex;

// == Recency Tracker ==
/// Mutex-guarded access order over keys with a fixed capacity.
#[derive(Debug)]
pub struct RecencyTracker<K> {
    order: Mutex<LruOrder<K>>,
}

impl<K> RecencyTracker<K>
where
    K: Eq + Hash + Clone,
{
    // == Constructor ==
    /// Creates an empty tracker holding at most `capacity` keys.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            order: Mutex::new(LruOrder::new(capacity.max(1))),
        }
    }

    // == Record Access ==
    /// Marks `key` as most recently used.
    ///
    /// If `key` is new and the tracker is full, the least recently used key
    /// is dropped from the order and returned so the caller can release it.
    pub fn record_access(&self, key: &K) -> Option<K> {
        self.order.lock().touch(key)
    }

    // == Remove ==
    /// Removes a key from the tracker. Returns whether it was tracked.
    pub fn remove(&self, key: &K) -> bool {
        self.order.lock().remove(key)
    }

    pub fn clear(&self) {
        self.order.lock().clear();
    }

    pub fn contains(&self, key: &K) -> bool {
        self.order.lock().map.contains_key(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    #[cfg(test)]
    pub fn peek_oldest(&self) -> Option<K> {
        self.order.lock().oldest().cloned()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        self.order.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.order.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.order.lock().capacity
    }
}

/// Node in the doubly-linked recency list
#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Index-linked list of keys. Head = most recent, tail = least recent.
#[derive(Debug)]
struct LruOrder<K> {
    map: HashMap<K, usize, RandomState>,
    nodes: Vec<Option<Node<K>>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_list: Vec<usize>,
    capacity: usize,
}

impl<K> LruOrder<K>
where
    K: Eq + Hash + Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_list: Vec::new(),
            capacity,
        }
    }

    fn touch(&mut self, key: &K) -> Option<K> {
        if let Some(&idx) = self.map.get(key) {
            self.move_to_front(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.pop_tail()
        } else {
            None
        };

        let idx = self.alloc_node();
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            prev: None,
            next: self.head,
        });
        self.link_front(idx);
        self.map.insert(key.clone(), idx);

        evicted
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.map.remove(key) {
            Some(idx) => {
                self.unlink(idx);
                self.nodes[idx] = None;
                self.free_list.push(idx);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    #[cfg(test)]
    fn oldest(&self) -> Option<&K> {
        self.tail
            .and_then(|idx| self.nodes[idx].as_ref())
            .map(|node| &node.key)
    }

    fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes[cursor?].as_ref()?;
            cursor = node.next;
            Some(&node.key)
        })
    }

    fn pop_tail(&mut self) -> Option<K> {
        let idx = self.tail?;
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.free_list.push(idx);
        self.map.remove(&node.key);
        Some(node.key)
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }

        self.unlink(idx);
        if let Some(node) = &mut self.nodes[idx] {
            node.next = self.head;
        }
        self.link_front(idx);
    }

    /// Links a detached node whose `next` already points at the old head.
    fn link_front(&mut self, idx: usize) {
        if let Some(head_idx) = self.head {
            if let Some(head) = &mut self.nodes[head_idx] {
                head.prev = Some(idx);
            }
        }

        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &mut self.nodes[idx] {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn alloc_node(&mut self) -> usize {
        match self.free_list.pop() {
            Some(idx) => idx,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        }
    }
}
