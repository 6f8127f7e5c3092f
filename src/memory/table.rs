use std::fmt;
use std::mem::size_of;

use super::block::{Block, SharedAllocator};
use super::{Handle, Key, Text};
use crate::vm::value::Value;

const INITIAL_CAPACITY: usize = 8;

struct Entry {
    key: Handle<Key>,
    value: Value,
    next: Option<Box<Entry>>,
    _block: Block,
}

/// Hash map from interned keys to values, with externally chained buckets.
///
/// The bucket array starts at 8 and doubles, rehashing every entry, once an
/// insert would push the load factor over 0.75. Each entry and the bucket
/// array are backed by allocator blocks.
pub struct Table {
    allocator: SharedAllocator,
    buckets: Vec<Option<Box<Entry>>>,
    count: usize,
    storage: Block,
}

impl Table {
    pub fn new(allocator: &SharedAllocator) -> Self {
        Self {
            allocator: SharedAllocator::clone(allocator),
            buckets: (0..INITIAL_CAPACITY).map(|_| None).collect(),
            count: 0,
            storage: Block::new(allocator, INITIAL_CAPACITY * size_of::<Option<Box<Entry>>>()),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Inserts or replaces the value for `key`. Returns true when the key was new.
    pub fn insert(&mut self, key: Handle<Key>, value: Value) -> bool {
        if let Some(entry) = self.find_mut(&key) {
            let old = std::mem::replace(&mut entry.value, value);
            old.free();
            return false;
        }

        if (self.count + 1) * 4 > self.buckets.len() * 3 {
            self.grow();
        }

        let entry = Box::new(Entry {
            key,
            value,
            next: None,
            _block: Block::new(&self.allocator, size_of::<Entry>()),
        });
        self.link(entry);
        self.count += 1;
        true
    }

    pub fn get(&self, key: &Handle<Key>) -> Option<Value> {
        self.find(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &Handle<Key>) -> bool {
        self.find(key).is_some()
    }

    pub fn remove(&mut self, key: &Handle<Key>) -> Option<Value> {
        let index = self.bucket_index(key);
        let mut chain = self.buckets[index].take();
        let mut removed = None;
        let mut kept = Vec::new();
        while let Some(mut entry) = chain {
            chain = entry.next.take();
            if removed.is_none() && entry.key == *key {
                removed = Some(entry);
            } else {
                kept.push(entry);
            }
        }
        for mut entry in kept.into_iter().rev() {
            entry.next = self.buckets[index].take();
            self.buckets[index] = Some(entry);
        }

        removed.map(|entry| {
            self.count -= 1;
            let Entry { value, .. } = *entry;
            value
        })
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            buckets: self.buckets.iter(),
            current: None,
        }
    }

    pub fn keys(&self) -> Vec<Handle<Key>> {
        self.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Copies every entry of `other` into this table. Heap values are copied
    /// by reference.
    pub fn copy_from(&mut self, other: &Table) {
        for (key, value) in other.iter() {
            self.insert(key.clone(), value.clone());
        }
    }

    fn bucket_index(&self, key: &Handle<Key>) -> usize {
        key.hash() as usize & (self.buckets.len() - 1)
    }

    fn find(&self, key: &Handle<Key>) -> Option<&Entry> {
        let mut current = self.buckets[self.bucket_index(key)].as_deref();
        while let Some(entry) = current {
            if entry.key == *key {
                return Some(entry);
            }
            current = entry.next.as_deref();
        }
        None
    }

    fn find_mut(&mut self, key: &Handle<Key>) -> Option<&mut Entry> {
        let index = self.bucket_index(key);
        let mut current = self.buckets[index].as_deref_mut();
        while let Some(entry) = current {
            if entry.key == *key {
                return Some(entry);
            }
            current = entry.next.as_deref_mut();
        }
        None
    }

    fn link(&mut self, mut entry: Box<Entry>) {
        let index = self.bucket_index(&entry.key);
        entry.next = self.buckets[index].take();
        self.buckets[index] = Some(entry);
    }

    fn grow(&mut self) {
        let capacity = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, (0..capacity).map(|_| None).collect());
        self.storage
            .resize(capacity * size_of::<Option<Box<Entry>>>());

        for mut chain in old {
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                self.link(entry);
            }
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table {{ len: {}, capacity: {} }}", self.count, self.buckets.len())
    }
}

pub struct Iter<'a> {
    buckets: std::slice::Iter<'a, Option<Box<Entry>>>,
    current: Option<&'a Entry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Handle<Key>, &'a Value);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current {
                self.current = entry.next.as_deref();
                return Some((&entry.key, &entry.value));
            }
            self.current = self.buckets.next()?.as_deref();
        }
    }
}
