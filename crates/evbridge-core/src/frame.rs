//! Native call frames and completions.
//!
//! A `CallFrame` is the argument tuple of one native call. It carries raw
//! views into buffers that the correlation table keeps alive, the uid used
//! as `user_data`, and the handler the native side reports completion to.
//!
//! Completions run on the loop thread, either synchronously from inside the
//! native call or later from an event-base step.

use crate::uid::Uid;
use std::fmt;
use std::sync::Arc;

/// A native entry point: takes the frame, returns the submission code.
pub type NativeFn = Arc<dyn Fn(&CallFrame) -> i32 + Send + Sync>;

/// Raw view of a buffer handed to native code.
///
/// The storage is owned elsewhere (a pending call's pinned set); heap
/// storage does not move when its owner moves, so the view stays valid
/// until the pending call is resolved.
#[derive(Debug, Clone, Copy)]
pub struct BufferRef {
    ptr: *const u8,
    len: usize,
}

// Safety: a BufferRef is a pointer + length; validity is guaranteed by the
// pinning contract, not by the thread that holds it.
unsafe impl Send for BufferRef {}
unsafe impl Sync for BufferRef {}

impl BufferRef {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the bytes.
    ///
    /// # Safety
    /// The owning storage must still be alive and unmodified, i.e. the
    /// pending call this buffer belongs to has not been resolved yet.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.ptr, self.len)
    }
}

/// One named bin of a record. The value is encoded by the codec layer and
/// treated as opaque bytes here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    pub name: String,
    pub value: Vec<u8>,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A record as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub bins: Vec<Bin>,
    pub generation: u32,
    pub expiration: u32,
}

/// What a completion carries besides its code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    None,
    Record(Record),
    Response(Vec<u8>),
}

/// A native completion, as seen by the completion handler.
#[derive(Debug, Clone)]
pub struct Completion {
    pub user_data: Option<Uid>,
    pub code: i32,
    pub payload: Payload,
}

/// Receives native completions on the loop thread.
///
/// **Contract:** must not panic; a panic here tears down the loop thread
/// shared by every pending call.
pub trait CompletionHandler: Send + Sync {
    fn complete(&self, completion: Completion);
}

/// Arguments of one native call.
#[derive(Clone, Default)]
pub struct CallFrame {
    /// Correlation token, `None` for calls nobody waits on.
    pub user_data: Option<Uid>,
    /// Pinned input buffers, in the order the native function expects.
    pub buffers: Vec<BufferRef>,
    /// Scalar arguments (ports, counts, flags).
    pub ints: Vec<i64>,
    /// Per-call timeout handed to the backend.
    pub timeout_ms: u32,
    handler: Option<Arc<dyn CompletionHandler>>,
}

impl CallFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_data(mut self, uid: Uid) -> Self {
        self.user_data = Some(uid);
        self
    }

    pub fn buffer(mut self, buf: BufferRef) -> Self {
        self.buffers.push(buf);
        self
    }

    pub fn int(mut self, v: i64) -> Self {
        self.ints.push(v);
        self
    }

    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn CompletionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Detach a completer so the completion can be delivered later
    /// (e.g. from a deferred event-base callback).
    pub fn completer(&self) -> FrameCompleter {
        FrameCompleter {
            user_data: self.user_data,
            handler: self.handler.clone(),
        }
    }

    /// Deliver a completion for this frame right now.
    pub fn complete(&self, code: i32, payload: Payload) {
        self.completer().complete(code, payload);
    }
}

impl fmt::Debug for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallFrame")
            .field("user_data", &self.user_data)
            .field("buffers", &self.buffers.len())
            .field("ints", &self.ints)
            .field("timeout_ms", &self.timeout_ms)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Owned completion target split off a `CallFrame`.
#[derive(Clone)]
pub struct FrameCompleter {
    user_data: Option<Uid>,
    handler: Option<Arc<dyn CompletionHandler>>,
}

impl FrameCompleter {
    pub fn complete(self, code: i32, payload: Payload) {
        match self.handler {
            Some(handler) => handler.complete(Completion {
                user_data: self.user_data,
                code,
                payload,
            }),
            None => {
                tracing::trace!(code, user_data = ?self.user_data, "completion without handler dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<Completion>>);

    impl CompletionHandler for Capture {
        fn complete(&self, completion: Completion) {
            self.0.lock().unwrap().push(completion);
        }
    }

    #[test]
    fn test_buffer_ref_views_storage() {
        let storage: Box<[u8]> = b"namespace".to_vec().into_boxed_slice();
        let view = BufferRef::new(&storage);
        // Moving the box does not move the heap bytes.
        let moved = storage;
        assert_eq!(unsafe { view.as_slice() }, b"namespace");
        assert_eq!(view.len(), moved.len());
    }

    #[test]
    fn test_frame_complete_reaches_handler() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let uid = Uid::new(42).unwrap();
        let frame = CallFrame::new()
            .user_data(uid)
            .timeout_ms(250)
            .handler(capture.clone());

        let completer = frame.completer();
        completer.complete(0, Payload::Response(b"ok".to_vec()));

        let got = capture.0.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].user_data, Some(uid));
        assert_eq!(got[0].payload, Payload::Response(b"ok".to_vec()));
    }

    #[test]
    fn test_complete_without_handler_is_noop() {
        CallFrame::new().complete(0, Payload::None);
    }
}
