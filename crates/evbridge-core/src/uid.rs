//! Correlation id type.
//!
//! A `Uid` is minted per pending call and handed to the native library as
//! its opaque `user_data` token. The native side hands it back untouched in
//! the completion callback, where it is used to find the pending call.

use std::fmt;
use std::num::NonZeroU64;

/// Correlation id: stored in the native `user_data` slot.
///
/// Never zero, so a null `user_data` can never be mistaken for a live call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Uid(NonZeroU64);

impl Uid {
    /// First uid a fresh table mints.
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    /// Build a uid from a raw counter value. Returns `None` for zero.
    #[inline]
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The uid minted after this one. Wraps back to `FIRST`.
    #[inline]
    pub(crate) fn successor(self) -> Self {
        Self(self.0.checked_add(1).unwrap_or(NonZeroU64::MIN))
    }

    /// The value passed to native code as `void *udata`.
    #[inline]
    pub fn as_user_data(self) -> *mut std::ffi::c_void {
        self.0.get() as usize as *mut std::ffi::c_void
    }

    /// Recover a uid from a native `udata` pointer.
    #[inline]
    pub fn from_user_data(ptr: *mut std::ffi::c_void) -> Option<Self> {
        Self::new(ptr as usize as u64)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid#{}", self.0)
    }
}
