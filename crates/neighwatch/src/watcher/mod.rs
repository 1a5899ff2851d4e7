//! Level-triggered descriptor readiness watcher
//!
//! A [`DescriptorWatcher`] wraps one caller-owned descriptor and bridges an
//! [`EventLoop`] into a reassignable callback:
//!
//! ```text
//! Idle --set()--> Configured --start()--> Active --stop()--> Configured(registered)
//!                                            ^                        |
//!                                            +--------start()---------+
//! ```
//!
//! While armed, the loop holds a strong reference to the watcher core, so an
//! active watcher keeps running even if the caller drops its handle. `stop()`
//! releases that reference. Dropping the last reference to the core disarms
//! and deregisters it; the descriptor itself is never closed.

pub mod event_loop;
pub mod poll_loop;
pub mod tokio_loop;

use crate::error::{NeighwatchError, Result};
use crate::host;
use crate::types::{Interest, Readiness};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::debug;

pub use event_loop::{EventLoop, ReadinessHandler, Token};
pub use poll_loop::PollLoop;
pub use tokio_loop::TokioEventLoop;

/// Callback invoked with `(is_readable, is_writable)`
pub type ReadinessCallback = Rc<dyn Fn(bool, bool)>;

#[derive(Debug, Default, Clone, Copy)]
struct WatcherState {
    descriptor: Option<RawFd>,
    interest: Interest,
    registration: Option<Token>,
}

struct WatcherCore {
    event_loop: Rc<dyn EventLoop>,
    this: Weak<WatcherCore>,
    state: Cell<WatcherState>,
    callback: RefCell<Option<ReadinessCallback>>,
}

impl WatcherCore {
    fn set(&self, fd: RawFd, interest: Interest) -> Result<()> {
        if fd < 0 {
            return Err(NeighwatchError::Type(format!(
                "descriptor must be non-negative, got {fd}"
            )));
        }

        let mut state = self.state.get();
        if let Some(token) = state.registration {
            return Err(NeighwatchError::State(format!(
                "descriptor {} already registered as {token}",
                state.descriptor.unwrap_or(-1)
            )));
        }

        state.descriptor = Some(fd);
        state.interest = interest;
        self.state.set(state);
        debug!(fd, readable = interest.readable, writable = interest.writable, "Watcher configured");
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.get();
        let Some(fd) = state.descriptor else {
            return Err(NeighwatchError::State("start called before set".to_string()));
        };

        let token = match state.registration {
            Some(token) => token,
            None => {
                let token = self.event_loop.register(fd)?;
                state.registration = Some(token);
                self.state.set(state);
                debug!(fd, token, "Registered descriptor");
                token
            }
        };

        if self.event_loop.is_armed(token) {
            return Ok(());
        }

        let handler: Rc<dyn ReadinessHandler> = self
            .this
            .upgrade()
            .ok_or_else(|| NeighwatchError::State("watcher is being released".to_string()))?;
        self.event_loop.arm(token, state.interest, handler)?;
        debug!(fd, token, "Watcher started");
        Ok(())
    }

    fn stop(&self) {
        if let Some(token) = self.state.get().registration {
            if self.event_loop.is_armed(token) {
                self.event_loop.disarm(token);
                debug!(token, "Watcher stopped");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.state
            .get()
            .registration
            .is_some_and(|token| self.event_loop.is_armed(token))
    }
}

impl ReadinessHandler for WatcherCore {
    fn on_ready(&self, readiness: Readiness) -> bool {
        let callback = self.callback.borrow().clone();
        let Some(callback) = callback else {
            debug!("No callback assigned, stopping watcher");
            self.stop();
            return false;
        };

        let reported = readiness.masked(self.state.get().interest);
        if reported.is_empty() {
            return false;
        }
        callback(reported.readable, reported.writable);
        true
    }
}

impl Drop for WatcherCore {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().registration.take() {
            if self.event_loop.is_armed(token) {
                self.event_loop.disarm(token);
            }
            self.event_loop.deregister(token);
            debug!(token, "Watcher released registration");
        }
    }
}

/// Readiness watcher over one caller-owned descriptor
///
/// Single-threaded: callbacks run on the event loop's thread, one at a time.
pub struct DescriptorWatcher {
    core: Rc<WatcherCore>,
}

impl DescriptorWatcher {
    /// Idle watcher bound to a host event loop
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        let core = Rc::new_cyclic(|this| WatcherCore {
            event_loop,
            this: this.clone(),
            state: Cell::new(WatcherState::default()),
            callback: RefCell::new(None),
        });
        Self { core }
    }

    /// Record the descriptor and interest
    ///
    /// Fails with a state error once the descriptor has been registered by
    /// `start()`; the earlier configuration is kept.
    pub fn set(&self, fd: RawFd, readable: bool, writable: bool) -> Result<()> {
        self.core.set(fd, Interest::new(readable, writable))
    }

    /// `set` over untyped host arguments `[fd, readable, writable]`
    pub fn set_from_host(&self, args: &[serde_json::Value]) -> Result<()> {
        let (fd, interest) = host::parse_set_args(args)?;
        self.core.set(fd, interest)
    }

    /// Register (first call) and arm the descriptor; no-op while running
    pub fn start(&self) -> Result<()> {
        self.core.start()
    }

    /// Disarm; no-op unless running
    pub fn stop(&self) {
        self.core.stop()
    }

    /// Replace the callback; takes effect from the next notification
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(bool, bool) + 'static,
    {
        *self.core.callback.borrow_mut() = Some(Rc::new(callback));
    }

    /// Remove the callback; the next notification stops the watcher
    pub fn clear_callback(&self) {
        self.core.callback.borrow_mut().take();
    }

    pub fn has_callback(&self) -> bool {
        self.core.callback.borrow().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    pub fn descriptor(&self) -> Option<RawFd> {
        self.core.state.get().descriptor
    }

    pub fn interest(&self) -> Interest {
        self.core.state.get().interest
    }

    /// Handle that does not keep the watcher alive, for use inside callbacks
    pub fn downgrade(&self) -> WeakDescriptorWatcher {
        WeakDescriptorWatcher {
            core: Rc::downgrade(&self.core),
        }
    }
}

impl fmt::Debug for DescriptorWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.state.get();
        f.debug_struct("DescriptorWatcher")
            .field("descriptor", &state.descriptor)
            .field("interest", &state.interest)
            .field("registration", &state.registration)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Non-owning watcher handle
#[derive(Clone)]
pub struct WeakDescriptorWatcher {
    core: Weak<WatcherCore>,
}

impl WeakDescriptorWatcher {
    /// Stop the watcher if it is still alive
    pub fn stop(&self) {
        if let Some(core) = self.core.upgrade() {
            core.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.upgrade().is_some_and(|core| core.is_running())
    }

    /// Regain a full handle while the watcher is alive
    pub fn upgrade(&self) -> Option<DescriptorWatcher> {
        self.core.upgrade().map(|core| DescriptorWatcher { core })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    const TICK: Option<Duration> = Some(Duration::from_millis(50));

    fn readable_pair() -> (UnixStream, UnixStream) {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        tx.write_all(b"ping").unwrap();
        (tx, rx)
    }

    fn recorder(watcher: &DescriptorWatcher) -> Rc<RefCell<Vec<(bool, bool)>>> {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = calls.clone();
        watcher.set_callback(move |r, w| sink.borrow_mut().push((r, w)));
        calls
    }

    #[test]
    fn test_negative_descriptor_is_type_error() {
        let watcher = DescriptorWatcher::new(Rc::new(PollLoop::new()));
        assert!(matches!(watcher.set(-1, true, false), Err(NeighwatchError::Type(_))));
        assert_eq!(watcher.descriptor(), None);
    }

    #[test]
    fn test_start_before_set_is_state_error() {
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        assert!(matches!(watcher.start(), Err(NeighwatchError::State(_))));
        assert_eq!(event_loop.registrations(), 0);
    }

    #[test]
    fn test_set_after_start_keeps_first_configuration() {
        let (_tx, rx) = readable_pair();
        let watcher = DescriptorWatcher::new(Rc::new(PollLoop::new()));
        watcher.set(rx.as_raw_fd(), true, false).unwrap();
        watcher.start().unwrap();

        assert!(matches!(watcher.set(0, false, true), Err(NeighwatchError::State(_))));
        assert_eq!(watcher.descriptor(), Some(rx.as_raw_fd()));
        assert_eq!(watcher.interest(), Interest::READABLE);

        // Still registered after stop
        watcher.stop();
        assert!(watcher.set(0, false, true).is_err());
    }

    #[test]
    fn test_set_twice_before_start_overwrites() {
        let watcher = DescriptorWatcher::new(Rc::new(PollLoop::new()));
        watcher.set(3, true, false).unwrap();
        watcher.set(4, false, true).unwrap();
        assert_eq!(watcher.descriptor(), Some(4));
        assert_eq!(watcher.interest(), Interest::WRITABLE);
    }

    #[test]
    fn test_start_is_idempotent() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        watcher.set(rx.as_raw_fd(), true, false).unwrap();
        watcher.start().unwrap();
        watcher.start().unwrap();
        assert_eq!(event_loop.registrations(), 1);
        assert_eq!(event_loop.active_registrations(), 1);
        assert!(watcher.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_restart_reuses_registration() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        watcher.stop();

        watcher.set(rx.as_raw_fd(), true, false).unwrap();
        watcher.start().unwrap();
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
        assert_eq!(event_loop.active_registrations(), 0);

        watcher.start().unwrap();
        assert!(watcher.is_running());
        assert_eq!(event_loop.registrations(), 1);
    }

    #[test]
    fn test_level_triggered_delivery_masks_interest() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        let calls = recorder(&watcher);
        watcher.set(rx.as_raw_fd(), true, false).unwrap();
        watcher.start().unwrap();

        // Socket is readable and writable; only readable was asked for
        for _ in 0..3 {
            event_loop.turn(TICK).unwrap();
        }
        assert_eq!(*calls.borrow(), vec![(true, false); 3]);
    }

    #[test]
    fn test_no_callback_auto_stops() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        watcher.set(rx.as_raw_fd(), true, true).unwrap();
        watcher.start().unwrap();

        event_loop.turn(TICK).unwrap();
        assert!(!watcher.is_running());
        assert_eq!(event_loop.active_registrations(), 0);
    }

    #[test]
    fn test_callback_can_stop_its_own_watcher() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        let weak = watcher.downgrade();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        watcher.set_callback(move |_, _| {
            counter.set(counter.get() + 1);
            weak.stop();
        });
        watcher.set(rx.as_raw_fd(), true, false).unwrap();
        watcher.start().unwrap();

        event_loop.turn(TICK).unwrap();
        event_loop.turn(TICK).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_reassigned_callback_used_on_next_event() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let watcher = DescriptorWatcher::new(event_loop.clone());
        let first = recorder(&watcher);
        watcher.set(rx.as_raw_fd(), true, false).unwrap();
        watcher.start().unwrap();
        event_loop.turn(TICK).unwrap();

        let second = recorder(&watcher);
        event_loop.turn(TICK).unwrap();
        assert_eq!(first.borrow().len(), 1);
        assert_eq!(second.borrow().len(), 1);

        watcher.clear_callback();
        assert!(!watcher.has_callback());
        event_loop.turn(TICK).unwrap();
        assert!(!watcher.is_running());
    }

    #[test]
    fn test_running_watcher_survives_handle_drop() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        let hits = Rc::new(Cell::new(0));
        let weak = {
            let watcher = DescriptorWatcher::new(event_loop.clone());
            let counter = hits.clone();
            watcher.set_callback(move |_, _| counter.set(counter.get() + 1));
            watcher.set(rx.as_raw_fd(), true, false).unwrap();
            watcher.start().unwrap();
            watcher.downgrade()
        };

        event_loop.turn(TICK).unwrap();
        assert_eq!(hits.get(), 1);
        assert!(weak.is_running());

        // Releasing the keep-alive tears the registration down
        weak.stop();
        assert!(weak.upgrade().is_none());
        assert_eq!(event_loop.registrations(), 0);
    }

    #[test]
    fn test_drop_of_stopped_watcher_deregisters() {
        let (_tx, rx) = readable_pair();
        let event_loop = Rc::new(PollLoop::new());
        {
            let watcher = DescriptorWatcher::new(event_loop.clone());
            watcher.set(rx.as_raw_fd(), true, false).unwrap();
            watcher.start().unwrap();
            watcher.stop();
            assert_eq!(event_loop.registrations(), 1);
        }
        assert_eq!(event_loop.registrations(), 0);
    }

    #[test]
    fn test_set_from_host_values() {
        let watcher = DescriptorWatcher::new(Rc::new(PollLoop::new()));
        watcher
            .set_from_host(&[serde_json::json!(7), serde_json::json!(false), serde_json::json!(true)])
            .unwrap();
        assert_eq!(watcher.descriptor(), Some(7));
        assert_eq!(watcher.interest(), Interest::WRITABLE);

        let err = watcher
            .set_from_host(&[serde_json::json!("7"), serde_json::json!(true), serde_json::json!(true)])
            .unwrap_err();
        assert!(matches!(err, NeighwatchError::Type(_)));
        assert_eq!(watcher.descriptor(), Some(7));
    }
}
