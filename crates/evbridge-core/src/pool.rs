//! Per-kind pool of reusable native handles.
//!
//! Allocating native objects (key containers, write-parameter blocks,
//! digest buffers) on every call is the expensive part of a request.
//! `ResourcePool` keeps returned handles per kind and hands the most
//! recently returned one out first.
//!
//! The pool is not synchronized: every method takes `&mut self`. Callers
//! that share a pool across threads wrap it in a lock.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Default number of idle handles kept per kind.
pub const DEFAULT_CAPACITY: usize = 1000;

pub struct ResourcePool<K, H> {
    available: HashMap<K, Vec<H>>,
    capacity: usize,
}

impl<K, H> ResourcePool<K, H>
where
    K: Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a pool that keeps at most `capacity` idle handles per kind.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            available: HashMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle handles of `kind`.
    pub fn available(&self, kind: &K) -> usize {
        self.available.get(kind).map_or(0, Vec::len)
    }

    /// Take a handle of `kind`, creating one with `factory` on a miss.
    #[inline]
    pub fn checkout<F>(&mut self, kind: K, factory: F) -> H
    where
        F: FnOnce() -> H,
    {
        self.checkout_with(kind, |()| factory(), ())
    }

    /// Like `checkout`, passing `args` to the factory on a miss.
    pub fn checkout_with<A, F>(&mut self, kind: K, factory: F, args: A) -> H
    where
        F: FnOnce(A) -> H,
    {
        match self.available.get_mut(&kind).and_then(Vec::pop) {
            Some(handle) => handle,
            None => factory(args),
        }
    }

    /// Return a handle unchanged.
    #[inline]
    pub fn checkin(&mut self, kind: K, handle: H) {
        self.checkin_with(kind, handle, |_| {});
    }

    /// Return a handle, applying `reset` before it is stored.
    ///
    /// At capacity the handle is dropped instead and `reset` is not run;
    /// dropping it is what disposes the native resource.
    pub fn checkin_with<R>(&mut self, kind: K, mut handle: H, reset: R)
    where
        R: FnOnce(&mut H),
    {
        let slot = self.available.entry(kind).or_default();
        if slot.len() < self.capacity {
            reset(&mut handle);
            slot.push(handle);
        } else {
            tracing::debug!(capacity = self.capacity, "pool full, dropping handle");
        }
    }
}

impl<K, H> Default for ResourcePool<K, H>
where
    K: Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Key,
        Params,
    }

    #[test]
    fn test_checkin_then_checkout_returns_same_handle() {
        let mut pool: ResourcePool<Kind, Vec<u8>> = ResourcePool::new();
        let mut created = 0;
        let mut h = pool.checkout(Kind::Key, || {
            created += 1;
            Vec::with_capacity(64)
        });
        h.extend_from_slice(b"user-key");
        let ptr = h.as_ptr();

        pool.checkin_with(Kind::Key, h, |buf| buf.clear());
        let again = pool.checkout(Kind::Key, || unreachable!("pool hit expected"));
        assert_eq!(again.as_ptr(), ptr);
        assert!(again.is_empty(), "reset must run before storing");
        assert_eq!(created, 1);
    }

    #[test]
    fn test_lifo_order() {
        let mut pool: ResourcePool<Kind, u32> = ResourcePool::new();
        pool.checkin(Kind::Key, 1);
        pool.checkin(Kind::Key, 2);
        pool.checkin(Kind::Key, 3);
        assert_eq!(pool.checkout(Kind::Key, || 0), 3);
        assert_eq!(pool.checkout(Kind::Key, || 0), 2);
        assert_eq!(pool.checkout(Kind::Key, || 0), 1);
        assert_eq!(pool.checkout(Kind::Key, || 0), 0);
    }

    #[test]
    fn test_kinds_are_separate() {
        let mut pool: ResourcePool<Kind, u32> = ResourcePool::new();
        pool.checkin(Kind::Params, 9);
        assert_eq!(pool.checkout(Kind::Key, || 5), 5);
        assert_eq!(pool.available(&Kind::Params), 1);
    }

    #[test]
    fn test_factory_args() {
        let mut pool: ResourcePool<Kind, Vec<u8>> = ResourcePool::new();
        let h = pool.checkout_with(Kind::Key, Vec::with_capacity, 128);
        assert!(h.capacity() >= 128);
    }

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_capacity_drops_extra_handles() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut resets = 0;
        let mut pool: ResourcePool<Kind, Tracked> = ResourcePool::with_capacity(2);
        for _ in 0..3 {
            pool.checkin_with(Kind::Key, Tracked(dropped.clone()), |_| resets += 1);
        }
        assert_eq!(pool.available(&Kind::Key), 2);
        assert_eq!(resets, 2);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
