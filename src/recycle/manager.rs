// src/recycle/manager.rs

//! Keyed collection of recyclers
//!
//! Backends that can be reached through several variants (one shell per
//! `su` binary, one link per broker) get one [`Recycler`] per key, created
//! on demand.

use super::{RecycleFactory, Recycler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tracing::debug;

pub struct RecyclerManager<K, T: ?Sized> {
    recyclers: Mutex<HashMap<K, Recycler<T>>>,
    delay: Duration,
}

impl<K, T> RecyclerManager<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: ?Sized + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_delay(super::DEFAULT_RECYCLE_DELAY)
    }

    /// Every pool created by this manager uses `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            recyclers: Mutex::new(HashMap::new()),
            delay,
        }
    }

    /// Return the pool for `key`, building it with `factory` if absent
    pub fn get<F, Fac>(&self, key: &K, factory: F) -> Recycler<T>
    where
        F: FnOnce() -> Fac,
        Fac: RecycleFactory<T>,
    {
        let mut recyclers = self.recyclers.lock();
        recyclers
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("RecyclerManager: new pool for {:?}", key);
                Recycler::with_delay(factory(), self.delay)
            })
            .clone()
    }

    /// Close and forget the pool for `key`
    pub fn remove(&self, key: &K) {
        let removed = self.recyclers.lock().remove(key);
        if let Some(recycler) = removed {
            recycler.close();
        }
    }

    /// Close every pool
    pub fn clear(&self) {
        let drained: Vec<_> = self.recyclers.lock().drain().map(|(_, r)| r).collect();
        for recycler in drained {
            recycler.close();
        }
    }

    pub fn len(&self) -> usize {
        self.recyclers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recyclers.lock().is_empty()
    }
}

impl<K, T> Default for RecyclerManager<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: ?Sized + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
