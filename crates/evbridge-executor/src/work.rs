//! Units of work executed on the loop thread.

use evbridge_core::frame::{CallFrame, NativeFn};
use std::fmt;
use std::sync::Arc;

/// A native function bound to its arguments.
///
/// Created on a caller thread, executed exactly once per attempt on the
/// loop thread. Throttled items are executed again on a later pass.
pub struct WorkItem {
    name: &'static str,
    func: NativeFn,
    frame: CallFrame,
    attempts: u32,
}

impl WorkItem {
    pub fn new(name: &'static str, func: NativeFn, frame: CallFrame) -> Self {
        Self {
            name,
            func,
            frame,
            attempts: 0,
        }
    }

    /// Item around a plain closure with an empty frame.
    pub fn from_fn<F>(name: &'static str, f: F) -> Self
    where
        F: Fn(&CallFrame) -> i32 + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(f), CallFrame::new())
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn frame(&self) -> &CallFrame {
        &self.frame
    }

    /// Times this item has been executed.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run the native function; returns its submission code.
    pub(crate) fn execute(&mut self) -> i32 {
        self.attempts += 1;
        (self.func)(&self.frame)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("name", &self.name)
            .field("frame", &self.frame)
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_counts_attempts() {
        let mut item = WorkItem::from_fn("echo", |frame| frame.ints.len() as i32);
        assert_eq!(item.attempts(), 0);
        assert_eq!(item.execute(), 0);
        assert_eq!(item.execute(), 0);
        assert_eq!(item.attempts(), 2);
        assert_eq!(item.name(), "echo");
    }
}
