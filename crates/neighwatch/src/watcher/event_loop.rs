//! Host event loop seam
//!
//! The watcher never polls by itself. A host loop owns descriptor readiness
//! registration and calls back into the watcher on its own thread.

use crate::error::Result;
use crate::types::{Interest, Readiness};
use std::os::fd::RawFd;
use std::rc::Rc;

/// Identifies one descriptor registration inside an event loop
pub type Token = usize;

/// Receives readiness notifications for an armed registration
pub trait ReadinessHandler {
    /// Returns `true` when the notification reached a callback
    fn on_ready(&self, readiness: Readiness) -> bool;
}

/// Descriptor readiness registration, arming and dispatch
///
/// Implementations must:
/// - hold a strong reference to the handler while the registration is armed
///   and for the whole duration of an `on_ready` call;
/// - release it on `disarm`/`deregister`;
/// - never hold an internal borrow while invoking or dropping a handler,
///   since handlers call back into the loop.
pub trait EventLoop {
    /// Create a registration for a descriptor the caller keeps owning
    ///
    /// The descriptor must stay open until the registration is deregistered.
    fn register(&self, fd: RawFd) -> Result<Token>;

    /// Start delivering notifications for the interest to the handler
    fn arm(&self, token: Token, interest: Interest, handler: Rc<dyn ReadinessHandler>)
    -> Result<()>;

    /// Stop delivering notifications; no-op when not armed
    fn disarm(&self, token: Token);

    fn is_armed(&self, token: Token) -> bool;

    /// Drop the registration; the descriptor itself stays open
    fn deregister(&self, token: Token);
}
