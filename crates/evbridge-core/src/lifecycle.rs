//! Lifecycle gates.
//!
//! An object tracks one value per *state type* (dispatcher state, cluster
//! state, ...). A `Gate` declares that an operation may only run while a
//! state type holds exactly a given value, and optionally what the value
//! becomes once the operation succeeds.
//!
//! ```ignore
//! let activate = Gate::define::<DispatcherStates>(
//!     DispatcherStates::INITIALIZED,
//!     Some(DispatcherStates::INITIALIZED | DispatcherStates::RUNNING),
//! );
//! lifecycle.run(&activate, || start_thread())?;
//! ```
//!
//! Matching is exact equality against the (possibly bit-combined) value,
//! not a subset test. Gates stacked with `and` must all match. A failed
//! check returns `OrderViolation` without running the operation; a failed
//! operation leaves every tracked value untouched.

use crate::error::OrderViolation;
use parking_lot::{Mutex, ReentrantMutex};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

/// Marker for a family of states tracked independently of the others.
pub trait StateType: 'static {
    const NAME: &'static str;
}

/// A tracked state value. Values combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateValue(pub u32);

impl StateValue {
    /// What every state type holds before it is first set.
    pub const UNINITIALIZED: Self = Self(0);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for StateValue {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current value of every state type for one owning object.
#[derive(Debug, Default)]
pub struct StateTracker {
    values: HashMap<TypeId, StateValue>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<S: StateType>(&self) -> StateValue {
        self.value(TypeId::of::<S>())
    }

    pub fn set<S: StateType>(&mut self, value: StateValue) {
        self.values.insert(TypeId::of::<S>(), value);
    }

    fn value(&self, id: TypeId) -> StateValue {
        self.values.get(&id).copied().unwrap_or_default()
    }

    /// Verify every guard of `gate` without changing anything.
    pub fn check(&self, gate: &Gate) -> Result<(), OrderViolation> {
        for guard in &gate.guards {
            let actual = self.value(guard.state_type);
            if actual != guard.required {
                return Err(OrderViolation {
                    state_type: guard.name,
                    required: guard.required.bits(),
                    actual: actual.bits(),
                });
            }
        }
        Ok(())
    }

    /// Apply the transitions of `gate`.
    pub fn apply(&mut self, gate: &Gate) {
        for guard in &gate.guards {
            if let Some(next) = guard.new_state {
                self.values.insert(guard.state_type, next);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Guard {
    state_type: TypeId,
    name: &'static str,
    required: StateValue,
    new_state: Option<StateValue>,
}

/// An ordering constraint attached to an operation.
#[derive(Debug, Clone)]
pub struct Gate {
    guards: Vec<Guard>,
}

impl Gate {
    /// Require `S == required`; on success move to `new_state` if given.
    pub fn define<S: StateType>(required: StateValue, new_state: Option<StateValue>) -> Self {
        Self {
            guards: vec![Guard {
                state_type: TypeId::of::<S>(),
                name: S::NAME,
                required,
                new_state,
            }],
        }
    }

    /// Require `S == required` without changing it.
    #[inline]
    pub fn require<S: StateType>(required: StateValue) -> Self {
        Self::define::<S>(required, None)
    }

    /// Stack another gate on the same operation (logical AND).
    pub fn and(mut self, other: Gate) -> Self {
        self.guards.extend(other.guards);
        self
    }

    /// Whether running through this gate changes any tracked value.
    pub fn changes_state(&self) -> bool {
        self.guards.iter().any(|g| g.new_state.is_some())
    }

    /// Run `op` against an exclusively borrowed tracker.
    pub fn invoke<T, E, F>(&self, tracker: &mut StateTracker, op: F) -> Result<T, E>
    where
        E: From<OrderViolation>,
        F: FnOnce() -> Result<T, E>,
    {
        tracker.check(self)?;
        let out = op()?;
        tracker.apply(self);
        Ok(out)
    }
}

/// A `StateTracker` shared by the components of one object.
///
/// State-changing gates are serialized by a re-entrant lock held for the
/// whole operation, so two concurrent `setup()` calls cannot both pass the
/// check. Read-only gates only take the short state lock; an operation that
/// is itself gated may therefore call other gated operations on the same
/// thread.
#[derive(Default)]
pub struct Lifecycle {
    states: Mutex<StateTracker>,
    transition: ReentrantMutex<()>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<S: StateType>(&self) -> StateValue {
        self.states.lock().get::<S>()
    }

    pub fn run<T, E, F>(&self, gate: &Gate, op: F) -> Result<T, E>
    where
        E: From<OrderViolation>,
        F: FnOnce() -> Result<T, E>,
    {
        let changes = gate.changes_state();
        let _serial = changes.then(|| self.transition.lock());

        self.states.lock().check(gate)?;
        let out = op()?;
        if changes {
            self.states.lock().apply(gate);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Loop {}
    impl StateType for Loop {
        const NAME: &'static str = "Loop";
    }

    enum Cluster {}
    impl StateType for Cluster {
        const NAME: &'static str = "Cluster";
    }

    const INIT: StateValue = StateValue(1);
    const RUNNING: StateValue = StateValue(2);

    #[derive(Debug, PartialEq)]
    enum TestError {
        Order(OrderViolation),
        Op,
    }

    impl From<OrderViolation> for TestError {
        fn from(v: OrderViolation) -> Self {
            TestError::Order(v)
        }
    }

    #[test]
    fn test_unseen_state_is_uninitialized() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.get::<Loop>(), StateValue::UNINITIALIZED);
    }

    #[test]
    fn test_success_applies_transition() {
        let mut tracker = StateTracker::new();
        let setup = Gate::define::<Loop>(StateValue::UNINITIALIZED, Some(INIT));
        let out: Result<u8, TestError> = setup.invoke(&mut tracker, || Ok(7));
        assert_eq!(out, Ok(7));
        assert_eq!(tracker.get::<Loop>(), INIT);
    }

    #[test]
    fn test_mismatch_does_not_run_op() {
        let mut tracker = StateTracker::new();
        let submit = Gate::require::<Loop>(INIT | RUNNING);
        let mut ran = false;
        let out: Result<(), TestError> = submit.invoke(&mut tracker, || {
            ran = true;
            Ok(())
        });
        assert!(!ran);
        assert_eq!(
            out,
            Err(TestError::Order(OrderViolation {
                state_type: "Loop",
                required: 3,
                actual: 0,
            }))
        );
        assert_eq!(tracker.get::<Loop>(), StateValue::UNINITIALIZED);
    }

    #[test]
    fn test_op_failure_leaves_state() {
        let mut tracker = StateTracker::new();
        tracker.set::<Loop>(INIT);
        let activate = Gate::define::<Loop>(INIT, Some(INIT | RUNNING));
        let out: Result<(), TestError> = activate.invoke(&mut tracker, || Err(TestError::Op));
        assert_eq!(out, Err(TestError::Op));
        assert_eq!(tracker.get::<Loop>(), INIT);
    }

    #[test]
    fn test_exact_match_not_subset() {
        let mut tracker = StateTracker::new();
        tracker.set::<Loop>(INIT | RUNNING);
        let needs_init = Gate::require::<Loop>(INIT);
        assert!(tracker.check(&needs_init).is_err());
    }

    #[test]
    fn test_stacked_gates_are_and() {
        let mut tracker = StateTracker::new();
        tracker.set::<Loop>(INIT | RUNNING);
        let add_host = Gate::require::<Cluster>(INIT).and(Gate::require::<Loop>(INIT | RUNNING));

        let err = tracker.check(&add_host).unwrap_err();
        assert_eq!(err.state_type, "Cluster");

        tracker.set::<Cluster>(INIT);
        assert!(tracker.check(&add_host).is_ok());
    }

    #[test]
    fn test_lifecycle_nested_transition_same_thread() {
        let lifecycle = Lifecycle::new();
        let outer = Gate::define::<Cluster>(StateValue::UNINITIALIZED, Some(INIT));
        let inner = Gate::define::<Loop>(StateValue::UNINITIALIZED, Some(INIT));

        let out: Result<(), TestError> = lifecycle.run(&outer, || lifecycle.run(&inner, || Ok(())));
        assert!(out.is_ok());
        assert_eq!(lifecycle.get::<Cluster>(), INIT);
        assert_eq!(lifecycle.get::<Loop>(), INIT);
    }

    #[test]
    fn test_lifecycle_concurrent_setup_only_one_wins() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let lifecycle = Arc::new(Lifecycle::new());
        let wins = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    let setup = Gate::define::<Loop>(StateValue::UNINITIALIZED, Some(INIT));
                    let r: Result<(), TestError> = lifecycle.run(&setup, || {
                        wins.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                    r.is_ok()
                })
            })
            .collect();
        let ok = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(ok, 1);
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
