//! Correlation table: matches native completions back to their callers.
//!
//! Every asynchronous native call carries a `Uid` as `user_data`. The table
//! maps that uid to the caller's callback and to the values that must stay
//! alive until the native side is done with them (the "pinned" set: input
//! buffers, pooled handles). On completion the entry is removed and both
//! are handed back to whoever resolves it.
//!
//! Uids are recycled through a free list (LIFO) bounded by `max_free`; a
//! uid is only ever reissued after the call it belonged to was resolved.
//!
//! Like `ResourcePool`, the table takes `&mut self` everywhere and carries
//! no lock of its own.

use crate::error::{CoreError, Result};
use crate::uid::Uid;
use std::collections::HashMap;

struct PendingCall<C, P> {
    callback: C,
    pinned: P,
}

pub struct CorrelationTable<C, P> {
    /// uid → pending call.
    outstanding: HashMap<Uid, PendingCall<C, P>>,
    /// Resolved uids ready for reuse.
    free: Vec<Uid>,
    /// Cap on `free`; `None` means unbounded.
    max_free: Option<usize>,
    /// Next uid to mint when `free` is empty.
    next: Uid,
}

impl<C, P> CorrelationTable<C, P> {
    /// Table with an unbounded uid free list.
    pub fn new() -> Self {
        Self::with_max_free(None)
    }

    pub fn with_max_free(max_free: Option<usize>) -> Self {
        Self {
            outstanding: HashMap::new(),
            free: Vec::new(),
            max_free,
            next: Uid::FIRST,
        }
    }

    /// Seed the free list with `n` freshly minted uids.
    pub fn with_prefilled(mut self, n: usize) -> Self {
        self.free.reserve(n);
        for _ in 0..n {
            let uid = self.mint();
            self.free.push(uid);
        }
        self
    }

    /// Number of registered, unresolved calls.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Number of uids waiting in the free list.
    #[inline]
    pub fn free_uids(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn is_pending(&self, uid: Uid) -> bool {
        self.outstanding.contains_key(&uid)
    }

    /// Record a pending call and return the uid to pass as `user_data`.
    pub fn register(&mut self, callback: C, pinned: P) -> Uid {
        let uid = match self.free.pop() {
            Some(uid) => uid,
            None => self.mint(),
        };
        debug_assert!(!self.outstanding.contains_key(&uid), "{} reissued while pending", uid);
        self.outstanding.insert(uid, PendingCall { callback, pinned });
        uid
    }

    /// Remove the pending call for `uid`, handing back its callback and
    /// pinned values.
    ///
    /// An unknown uid (duplicate completion, or an entry freed by mistake)
    /// is logged and returned as `CorrelationNotFound`; it never panics,
    /// since this runs on the loop thread every call shares.
    pub fn resolve(&mut self, uid: Uid) -> Result<(C, P)> {
        match self.outstanding.remove(&uid) {
            Some(call) => {
                if self.max_free.map_or(true, |max| self.free.len() < max) {
                    self.free.push(uid);
                }
                Ok((call.callback, call.pinned))
            }
            None => {
                tracing::error!(%uid, "fatal fault in completion handling: unable to find uid");
                Err(CoreError::CorrelationNotFound(uid))
            }
        }
    }

    fn mint(&mut self) -> Uid {
        let uid = self.next;
        self.next = uid.successor();
        uid
    }
}

impl<C, P> Default for CorrelationTable<C, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    type Table = CorrelationTable<&'static str, Vec<Box<[u8]>>>;

    #[test]
    fn test_register_resolve_returns_exact_tuple() {
        let mut table = Table::new();
        let pinned = vec![b"ns".to_vec().into_boxed_slice(), b"key".to_vec().into_boxed_slice()];
        let uid = table.register("cb-1", pinned.clone());
        assert_eq!(table.outstanding(), 1);

        let (cb, got) = table.resolve(uid).unwrap();
        assert_eq!(cb, "cb-1");
        assert_eq!(got, pinned);
        assert_eq!(table.outstanding(), 0);
    }

    #[test]
    fn test_second_resolve_is_not_found() {
        let mut table = Table::new();
        let uid = table.register("cb", Vec::new());
        assert!(table.resolve(uid).is_ok());
        match table.resolve(uid) {
            Err(CoreError::CorrelationNotFound(u)) => assert_eq!(u, uid),
            other => panic!("expected CorrelationNotFound, got {:?}", other.map(|(c, _)| c)),
        }
    }

    #[test]
    fn test_uid_reused_after_resolve() {
        let mut table = Table::new();
        let a = table.register("a", Vec::new());
        table.resolve(a).unwrap();
        let b = table.register("b", Vec::new());
        assert_eq!(a, b);
    }

    #[test]
    fn test_free_list_cap() {
        let mut table = Table::with_max_free(Some(1));
        let a = table.register("a", Vec::new());
        let b = table.register("b", Vec::new());
        table.resolve(a).unwrap();
        table.resolve(b).unwrap();
        assert_eq!(table.free_uids(), 1);

        let c = table.register("c", Vec::new());
        assert_eq!(c, a, "only the first resolved uid fit in the free list");
        let d = table.register("d", Vec::new());
        assert!(d != a && d != b, "b was dropped, a fresh uid is minted");
    }

    #[test]
    fn test_prefilled_free_list() {
        let mut table = Table::new().with_prefilled(8);
        assert_eq!(table.free_uids(), 8);
        table.register("x", Vec::new());
        assert_eq!(table.free_uids(), 7);
    }

    #[test]
    fn test_pending_uids_are_unique() {
        let mut table = Table::with_max_free(Some(4)).with_prefilled(2);
        let mut live = HashSet::new();
        for round in 0..50 {
            let uid = table.register("cb", Vec::new());
            assert!(live.insert(uid), "duplicate pending uid {}", uid);
            if round % 3 == 0 {
                let victim = *live.iter().next().unwrap();
                live.remove(&victim);
                table.resolve(victim).unwrap();
            }
        }
        assert_eq!(table.outstanding(), live.len());
    }
}
