//! cache::bounded
//!
//! Fixed-capacity FIFO-eviction map.
//!
//! # Semantics
//!
//! - Each *new* key is appended to an insertion-order queue.
//! - Exceeding capacity evicts the oldest enqueued key from both the queue
//!   and the map.
//! - Re-inserting an existing key updates its value in place without
//!   re-ordering: eviction order is pure FIFO, not LRU.
//!
//! Used to memoize decoded commit records, where insertion order is a good
//! enough proxy for usefulness and bookkeeping on reads would cost more
//! than the occasional re-fetch.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A mapping with a maximum entry count and FIFO eviction.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A zero capacity is clamped to one so insertion always succeeds.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Look up a value.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Insert or update a value, evicting the oldest entry on overflow.
    pub fn insert(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            // Existing key keeps its queue position.
            return;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The configured maximum entry count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
