//! Keyspace: values plus per-key expiry deadlines.
//!
//! Expired keys are removed lazily when looked up, and actively by the server
//! cron which samples random entries of the expire table.

use crate::collections::Dict;
use crate::error::Result;
use crate::object::{Object, Robj};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Expire entries sampled per active expiry cycle
pub const EXPIRE_SAMPLES: usize = 100;

/// Wall-clock milliseconds since the Unix epoch
pub fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub struct Db {
    data: Dict<Robj, Robj>,
    expire: Dict<Robj, Robj>,
}

impl Db {
    pub fn new() -> Self {
        Self {
            data: Dict::new(),
            expire: Dict::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn expires(&self) -> usize {
        self.expire.len()
    }

    /// Delete `key` if its deadline is at or before `now`.
    fn expire_if_needed(&mut self, key: &Robj, now: i64) -> bool {
        let deadline = match self.expire.get(key).and_then(|when| when.int_value()) {
            Some(deadline) => deadline,
            None => return false,
        };
        if deadline > now {
            return false;
        }
        let _ = self.expire.delete(key);
        let _ = self.data.delete(key);
        debug!("Expired key {:?}", key);
        true
    }

    pub fn lookup(&mut self, key: &Robj) -> Option<Robj> {
        self.lookup_at(key, unix_ms())
    }

    pub fn lookup_at(&mut self, key: &Robj, now: i64) -> Option<Robj> {
        self.expire_if_needed(key, now);
        self.data.get(key).cloned()
    }

    /// Store `value` under `key`, clearing any pending expiry.
    pub fn set(&mut self, key: Robj, value: Robj) -> Result<()> {
        let _ = self.expire.delete(&key);
        self.data.set(key, value)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &Robj) -> bool {
        let _ = self.expire.delete(key);
        self.data.delete(key).is_ok()
    }

    /// Set an absolute deadline in unix milliseconds. Returns false when the
    /// key does not exist.
    pub fn set_expire(&mut self, key: &Robj, when_ms: i64) -> Result<bool> {
        if self.lookup(key).is_none() {
            return Ok(false);
        }
        self.expire.set(Rc::clone(key), Object::int(when_ms))?;
        Ok(true)
    }

    /// Remaining lifetime in milliseconds, `None` when no deadline is set
    pub fn ttl_ms(&mut self, key: &Robj, now: i64) -> Option<i64> {
        let deadline = self.expire.get(key)?.int_value()?;
        Some((deadline - now).max(0))
    }

    /// Sample up to `samples` expire entries and drop the expired ones.
    /// Returns how many keys were removed.
    pub fn active_expire_cycle(&mut self, samples: usize, now: i64) -> usize {
        let mut removed = 0;
        for _ in 0..samples {
            let key = match self.expire.random_entry() {
                Some((key, when)) if when.int_value().is_some_and(|w| w <= now) => Rc::clone(key),
                Some(_) => continue,
                None => break,
            };
            let _ = self.expire.delete(&key);
            let _ = self.data.delete(&key);
            removed += 1;
        }
        if removed > 0 {
            debug!("Active expiry removed {} keys", removed);
        }
        removed
    }

    /// Advance any in-progress rehash of both tables by up to `steps` buckets.
    pub fn rehash_tick(&mut self, steps: usize) {
        self.data.rehash(steps);
        self.expire.rehash(steps);
    }

    pub fn is_rehashing(&self) -> bool {
        self.data.is_rehashing() || self.expire.is_rehashing()
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}
