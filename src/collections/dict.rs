//! Chained hash table that resizes incrementally.
//!
//! Two tables are kept: `active` serves every request while idle; once a grow
//! is triggered a second `incoming` table of twice the capacity is allocated
//! and every subsequent lookup, insert or delete migrates one bucket of
//! `active` into it. When `active` runs empty `incoming` takes its place.
//! Capacities are powers of two so the bucket index is `hash & mask`.

use rand::Rng;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use thiserror::Error;

/// Capacity of the first table allocated on insert
pub const INITIAL_SIZE: usize = 8;

/// Grow once the load factor would exceed this ratio
pub const FORCE_RATIO: usize = 2;

const GROW_RATIO: usize = 2;

/// Empty buckets probed before `random_entry` gives up
const RANDOM_RETRIES: usize = 1000;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    #[error("key already exists")]
    KeyExists,

    #[error("key not found")]
    KeyNotFound,

    #[error("expand requested while rehashing")]
    Rehashing,

    #[error("table already holds {current} buckets, {requested} requested")]
    ExpandNotNeeded { current: usize, requested: usize },

    #[error("requested capacity overflows")]
    CapacityOverflow,
}

struct Entry<K, V> {
    key: K,
    value: V,
    next: Option<Box<Entry<K, V>>>,
}

type Bucket<K, V> = Option<Box<Entry<K, V>>>;

struct Table<K, V> {
    buckets: Box<[Bucket<K, V>]>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn with_size(size: usize) -> Self {
        Self {
            buckets: (0..size).map(|_| None).collect(),
            used: 0,
        }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn find<Q>(&self, hash: usize, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut cur = self.buckets[hash & self.mask()].as_deref();
        while let Some(entry) = cur {
            if entry.key.borrow() == key {
                return Some(entry);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    /// Position of `key` within its chain
    fn position<Q>(&self, hash: usize, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut cur = self.buckets[hash & self.mask()].as_deref();
        let mut pos = 0;
        while let Some(entry) = cur {
            if entry.key.borrow() == key {
                return Some(pos);
            }
            pos += 1;
            cur = entry.next.as_deref();
        }
        None
    }

    fn link_at(&mut self, hash: usize, pos: usize) -> Option<&mut Bucket<K, V>> {
        let idx = hash & self.mask();
        let mut link = &mut self.buckets[idx];
        for _ in 0..pos {
            link = &mut link.as_mut()?.next;
        }
        Some(link)
    }

    fn unlink<Q>(&mut self, hash: usize, key: &Q) -> Option<Box<Entry<K, V>>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let pos = self.position(hash, key)?;
        let link = self.link_at(hash, pos)?;
        let mut entry = link.take()?;
        *link = entry.next.take();
        self.used -= 1;
        Some(entry)
    }

    fn push_head(&mut self, hash: usize, mut entry: Box<Entry<K, V>>) {
        let idx = hash & self.mask();
        entry.next = self.buckets[idx].take();
        self.buckets[idx] = Some(entry);
        self.used += 1;
    }
}

pub struct Dict<K, V, S = RandomState> {
    active: Option<Table<K, V>>,
    incoming: Option<Table<K, V>>,
    rehash_idx: Option<usize>,
    hasher: S,
}

fn hash_of<S: BuildHasher, Q: Hash + ?Sized>(hasher: &S, key: &Q) -> usize {
    hasher.hash_one(key) as usize
}

impl<K: Hash + Eq, V> Dict<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K: Hash + Eq, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> Dict<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            active: None,
            incoming: None,
            rehash_idx: None,
            hasher,
        }
    }

    /// Number of live entries across both tables
    pub fn len(&self) -> usize {
        self.table_used(0) + self.table_used(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Next `active` bucket to migrate, `None` while idle
    pub fn rehash_index(&self) -> Option<usize> {
        self.rehash_idx
    }

    /// Bucket count of table 0 (`active`) or 1 (`incoming`), 0 if unallocated
    pub fn table_size(&self, table: usize) -> usize {
        self.table(table).map_or(0, Table::size)
    }

    pub fn table_used(&self, table: usize) -> usize {
        self.table(table).map_or(0, |t| t.used)
    }

    fn table(&self, table: usize) -> Option<&Table<K, V>> {
        match table {
            0 => self.active.as_ref(),
            1 => self.incoming.as_ref(),
            _ => None,
        }
    }

    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|e| &e.value)
    }

    pub fn contains_key<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    fn find<Q>(&mut self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.active.as_ref()?;
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = hash_of(&self.hasher, key);
        if let Some(entry) = self.active.as_ref()?.find(hash, key) {
            return Some(entry);
        }
        if self.is_rehashing() {
            return self.incoming.as_ref()?.find(hash, key);
        }
        None
    }

    /// Insert `key` unless it is already present in either table.
    pub fn add(&mut self, key: K, value: V) -> Result<(), DictError> {
        let hash = self.prepare_insert(&key)?;
        if self.locate(hash, &key).is_some() {
            return Err(DictError::KeyExists);
        }
        self.insert_new(hash, key, value);
        Ok(())
    }

    /// Upsert. A replaced value is dropped, releasing the table's reference.
    pub fn set(&mut self, key: K, value: V) -> Result<(), DictError> {
        let hash = self.prepare_insert(&key)?;
        let Some((table, pos)) = self.locate(hash, &key) else {
            self.insert_new(hash, key, value);
            return Ok(());
        };
        let slot = match table {
            0 => self.active.as_mut(),
            _ => self.incoming.as_mut(),
        }
        .and_then(|t| t.link_at(hash, pos))
        .and_then(|link| link.as_mut());
        if let Some(entry) = slot {
            entry.value = value;
        }
        Ok(())
    }

    /// Remove `key`, dropping both the stored key and value.
    pub fn delete<Q>(&mut self, key: &Q) -> Result<(), DictError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove(key).map(drop).ok_or(DictError::KeyNotFound)
    }

    /// Remove `key` and return the owned pair.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.active.as_ref()?;
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = hash_of(&self.hasher, key);
        let mut entry = self.active.as_mut()?.unlink(hash, key);
        if entry.is_none() && self.is_rehashing() {
            entry = self.incoming.as_mut()?.unlink(hash, key);
        }
        entry.map(|e| (e.key, e.value))
    }

    /// Sample an entry. Picks a random non-empty bucket from the more
    /// populated table, then a random element of its chain.
    pub fn random_entry(&mut self) -> Option<(&K, &V)> {
        self.active.as_ref()?;
        if self.is_rehashing() {
            self.rehash_step();
        }
        let use_incoming = self.is_rehashing() && self.table_used(1) > self.table_used(0);
        let table = if use_incoming {
            self.incoming.as_ref()?
        } else {
            self.active.as_ref()?
        };
        if table.used == 0 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let mut idx = rng.gen_range(0..table.size());
        let mut tries = 0;
        while table.buckets[idx].is_none() && tries < RANDOM_RETRIES {
            idx = rng.gen_range(0..table.size());
            tries += 1;
        }

        let head = table.buckets[idx].as_deref()?;
        let mut chain_len = 0;
        let mut cur = Some(head);
        while let Some(entry) = cur {
            chain_len += 1;
            cur = entry.next.as_deref();
        }

        let mut entry = head;
        for _ in 0..rng.gen_range(0..chain_len) {
            entry = entry.next.as_deref()?;
        }
        Some((&entry.key, &entry.value))
    }

    /// Grow to at least `size` buckets (rounded up to a power of two).
    ///
    /// The first call allocates `active` directly; later calls allocate
    /// `incoming` and start migrating.
    pub fn expand(&mut self, size: usize) -> Result<(), DictError> {
        let size = next_power(size)?;
        if self.is_rehashing() {
            return Err(DictError::Rehashing);
        }
        let table = Table::with_size(size);
        match &self.active {
            None => self.active = Some(table),
            Some(active) if active.size() >= size => {
                return Err(DictError::ExpandNotNeeded {
                    current: active.size(),
                    requested: size,
                });
            }
            Some(_) => {
                self.incoming = Some(table);
                self.rehash_idx = Some(0);
            }
        }
        Ok(())
    }

    /// Perform up to `steps` migration steps. Returns true while more remain.
    pub fn rehash(&mut self, steps: usize) -> bool {
        for _ in 0..steps {
            if !self.is_rehashing() {
                break;
            }
            self.rehash_step();
        }
        self.is_rehashing()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            tables: [self.active.as_ref(), self.incoming.as_ref()],
            table: 0,
            bucket: 0,
            entry: None,
        }
    }

    /// One migration step plus the grow check every insertion starts with.
    fn prepare_insert(&mut self, key: &K) -> Result<usize, DictError> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed()?;
        Ok(hash_of(&self.hasher, key))
    }

    fn insert_new(&mut self, hash: usize, key: K, value: V) {
        let entry = Box::new(Entry {
            key,
            value,
            next: None,
        });
        let table = if self.is_rehashing() {
            self.incoming.as_mut()
        } else {
            self.active.as_mut()
        };
        // prepare_insert allocated the target table
        if let Some(table) = table {
            table.push_head(hash, entry);
        }
    }

    fn expand_if_needed(&mut self) -> Result<(), DictError> {
        if self.is_rehashing() {
            return Ok(());
        }
        let Some(active) = &self.active else {
            return self.expand(INITIAL_SIZE);
        };
        // Count the entry about to be inserted.
        let pending = active.used + 1;
        let size = active.size();
        if pending > size && pending / size > FORCE_RATIO {
            let target = size.checked_mul(GROW_RATIO).ok_or(DictError::CapacityOverflow)?;
            return self.expand(target);
        }
        Ok(())
    }

    /// Table index and chain position of `key`, probing `incoming` only
    /// while rehashing.
    fn locate<Q>(&self, hash: usize, key: &Q) -> Option<(usize, usize)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        if let Some(pos) = self.active.as_ref()?.position(hash, key) {
            return Some((0, pos));
        }
        if self.is_rehashing() {
            let pos = self.incoming.as_ref()?.position(hash, key)?;
            return Some((1, pos));
        }
        None
    }

    /// Move one non-empty `active` bucket into `incoming`, then skip the
    /// empty buckets after it. Completes the rehash once `active` is empty.
    fn rehash_step(&mut self) {
        let Some(mut idx) = self.rehash_idx else {
            return;
        };
        let (Some(active), Some(incoming)) = (self.active.as_mut(), self.incoming.as_mut()) else {
            return;
        };

        if active.used > 0 {
            while idx < active.size() && active.buckets[idx].is_none() {
                idx += 1;
            }
            if idx < active.size() {
                let mut chain = active.buckets[idx].take();
                while let Some(mut entry) = chain {
                    chain = entry.next.take();
                    let hash = hash_of(&self.hasher, &entry.key);
                    active.used -= 1;
                    incoming.push_head(hash, entry);
                }
                idx += 1;
            }
            while idx < active.size() && active.buckets[idx].is_none() {
                idx += 1;
            }
        }

        if active.used == 0 {
            self.active = self.incoming.take();
            self.rehash_idx = None;
        } else {
            self.rehash_idx = Some(idx);
        }
    }
}

fn next_power(size: usize) -> Result<usize, DictError> {
    size.max(INITIAL_SIZE)
        .checked_next_power_of_two()
        .ok_or(DictError::CapacityOverflow)
}

impl<K, V, S> fmt::Debug for Dict<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = |t: &Option<Table<K, V>>| t.as_ref().map(|t| (t.size(), t.used));
        f.debug_struct("Dict")
            .field("active", &stats(&self.active))
            .field("incoming", &stats(&self.incoming))
            .field("rehash_idx", &self.rehash_idx)
            .finish()
    }
}

/// Iterator over every entry of both tables
pub struct Iter<'a, K, V> {
    tables: [Option<&'a Table<K, V>>; 2],
    table: usize,
    bucket: usize,
    entry: Option<&'a Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entry {
                self.entry = entry.next.as_deref();
                return Some((&entry.key, &entry.value));
            }
            let table = match self.tables.get(self.table)? {
                Some(t) => *t,
                None => {
                    self.table += 1;
                    self.bucket = 0;
                    continue;
                }
            };
            if self.bucket >= table.size() {
                self.table += 1;
                self.bucket = 0;
                continue;
            }
            self.entry = table.buckets[self.bucket].as_deref();
            self.bucket += 1;
        }
    }
}
