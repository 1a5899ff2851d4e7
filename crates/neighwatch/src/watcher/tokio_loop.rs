//! tokio event loop adapter
//!
//! Registrations are `AsyncFd`s over borrowed descriptors. Each armed
//! registration runs as one task on a `LocalSet` owned by the loop; the host
//! drives it with [`TokioEventLoop::run_until`].
//!
//! # Performance (P2)
//! Uses tokio AsyncFd for epoll-based readiness. tokio caches readiness
//! edge-style; the task keeps it set while a zero-timeout `poll(2)` still
//! reports the condition, which turns the edges back into level-triggered
//! delivery, and yields to the scheduler between deliveries.
//!
//! # Ownership
//! The loop holds the only strong references to the descriptor registration
//! and to the armed handler. Tasks see both through `Weak`, so disarming or
//! deregistering releases them at once rather than on the next scheduler
//! tick.

use super::event_loop::{EventLoop, ReadinessHandler, Token};
use super::poll_loop::poll_now;
use crate::error::{NeighwatchError, Result};
use crate::types::{Interest, Readiness};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::runtime::Handle;
use tokio::task::{JoinHandle, LocalSet};
use tracing::{debug, trace, warn};

/// Descriptor owned by the caller; registering it never closes it
struct BorrowedDescriptor(RawFd);

impl AsRawFd for BorrowedDescriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct Armed {
    handler: Rc<dyn ReadinessHandler>,
}

struct Slot {
    fd: Rc<AsyncFd<BorrowedDescriptor>>,
    armed: Option<(Rc<Armed>, JoinHandle<()>)>,
}

/// Event loop backed by the tokio reactor
///
/// Registering needs a tokio runtime with IO enabled; outside one it fails
/// with [`NeighwatchError::State`]. Deliveries only happen while the host
/// awaits [`TokioEventLoop::run_until`].
#[derive(Default)]
pub struct TokioEventLoop {
    local: LocalSet,
    slots: RefCell<HashMap<Token, Slot>>,
    next_token: Cell<Token>,
}

impl TokioEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive armed registrations until `future` completes
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.local.run_until(future).await
    }

    pub fn registrations(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn active_registrations(&self) -> usize {
        self.slots
            .borrow()
            .keys()
            .filter(|token| self.is_armed(**token))
            .count()
    }
}

impl EventLoop for TokioEventLoop {
    fn register(&self, fd: RawFd) -> Result<Token> {
        if fd < 0 {
            return Err(NeighwatchError::Type(format!(
                "descriptor must be non-negative, got {fd}"
            )));
        }
        if Handle::try_current().is_err() {
            return Err(NeighwatchError::State(
                "tokio event loop used outside a runtime".to_string(),
            ));
        }

        // SAFETY: callers keep the descriptor open until the registration is
        // deregistered, and the AsyncFd is dropped no later than that.
        let async_fd = unsafe { AsyncFd::register(BorrowedDescriptor(fd)) }.map_err(io::Error::from)?;
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.slots.borrow_mut().insert(
            token,
            Slot {
                fd: Rc::new(async_fd),
                armed: None,
            },
        );
        debug!(fd, token, "Registered descriptor with tokio reactor");
        Ok(token)
    }

    fn arm(&self, token: Token, interest: Interest, handler: Rc<dyn ReadinessHandler>) -> Result<()> {
        let previous = {
            let mut slots = self.slots.borrow_mut();
            let slot = slots
                .get_mut(&token)
                .ok_or_else(|| NeighwatchError::State(format!("unknown registration {token}")))?;
            let armed = Rc::new(Armed { handler });
            let task = self
                .local
                .spawn_local(dispatch(Rc::downgrade(&slot.fd), interest, Rc::downgrade(&armed)));
            slot.armed.replace((armed, task))
        };
        if let Some((armed, task)) = previous {
            task.abort();
            drop(armed);
        }
        Ok(())
    }

    fn disarm(&self, token: Token) {
        let previous = self
            .slots
            .borrow_mut()
            .get_mut(&token)
            .and_then(|slot| slot.armed.take());
        if let Some((armed, task)) = previous {
            task.abort();
            drop(armed);
        }
    }

    fn is_armed(&self, token: Token) -> bool {
        self.slots
            .borrow()
            .get(&token)
            .and_then(|slot| slot.armed.as_ref())
            .is_some_and(|(_, task)| !task.is_finished())
    }

    fn deregister(&self, token: Token) {
        let removed = self.slots.borrow_mut().remove(&token);
        if let Some(slot) = removed {
            if let Some((armed, task)) = slot.armed {
                task.abort();
                drop(armed);
            }
            drop(slot.fd);
        }
    }
}

/// Deliver readiness for one armed registration until disarmed
async fn dispatch(fd: Weak<AsyncFd<BorrowedDescriptor>>, interest: Interest, armed: Weak<Armed>) {
    // Armed with no interest: stays armed, never fires
    if interest.is_empty() {
        return std::future::pending().await;
    }

    loop {
        match std::future::poll_fn(|cx| poll_deliver(cx, &fd, interest, &armed)).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(error = %e, "Readiness wait failed");
                return;
            }
        }
        tokio::task::yield_now().await;
    }
}

/// One delivery attempt; `Ok(false)` once the registration is gone
fn poll_deliver(
    cx: &mut Context<'_>,
    fd: &Weak<AsyncFd<BorrowedDescriptor>>,
    interest: Interest,
    armed: &Weak<Armed>,
) -> Poll<io::Result<bool>> {
    let Some(fd) = fd.upgrade() else {
        return Poll::Ready(Ok(false));
    };

    let mut read_guard = None;
    let mut write_guard = None;
    if interest.readable {
        if let Poll::Ready(guard) = fd.poll_read_ready(cx) {
            read_guard = Some(guard?);
        }
    }
    if interest.writable {
        if let Poll::Ready(guard) = fd.poll_write_ready(cx) {
            write_guard = Some(guard?);
        }
    }
    if read_guard.is_none() && write_guard.is_none() {
        return Poll::Pending;
    }

    let Some(armed) = armed.upgrade() else {
        return Poll::Ready(Ok(false));
    };
    let readiness = Readiness::new(read_guard.is_some(), write_guard.is_some());
    let delivered = armed.handler.on_ready(readiness);
    trace!(fd = fd.as_raw_fd(), delivered, "Dispatched readiness");

    let still = poll_now(fd.as_fd(), interest)
        .map(|r| r.masked(interest))
        .unwrap_or_default();
    if let Some(mut guard) = read_guard.take() {
        if !still.readable {
            guard.clear_ready();
        }
    }
    if let Some(mut guard) = write_guard.take() {
        if !still.writable {
            guard.clear_ready();
        }
    }

    Poll::Ready(Ok(true))
}
