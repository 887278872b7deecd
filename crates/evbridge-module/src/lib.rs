//! # evbridge-module: Default implementations
//!
//! This crate provides the default implementation for every evbridge
//! seam the dispatcher and the client are generic over.
//!
//! ## Default stack
//!
//! | Seam            | Default Impl     | Alternative                 |
//! |-----------------|------------------|-----------------------------|
//! | EventBase       | EpollEventBase   | ParkedEventBase (portable)  |
//! | Notifier        | EventFdNotifier  | condvar signal (parked)     |
//! | Call surface    | CallSurface      | -                           |
//! | Library loading | LibraryHandle    | -                           |
//! | Backend         | (native library) | LoopbackBackend (in-memory) |
//!
//! `DefaultEventBase` resolves to the epoll base on Linux and to the
//! parked base everywhere else.

pub mod deferred;
pub mod parked_base;
pub mod surface;
pub mod symbols;
pub mod loopback;

#[cfg(target_os = "linux")]
pub mod eventfd_notifier;
#[cfg(target_os = "linux")]
pub mod epoll_base;

pub use deferred::DeferHandle;
pub use parked_base::ParkedEventBase;
pub use surface::{CallSurface, Exports, LibraryHandle};
pub use loopback::LoopbackBackend;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub use epoll_base::EpollEventBase;
        pub use eventfd_notifier::EventFdNotifier;

        /// Event base used when the caller does not supply a factory.
        pub type DefaultEventBase = EpollEventBase;
    } else {
        /// Event base used when the caller does not supply a factory.
        pub type DefaultEventBase = ParkedEventBase;
    }
}
