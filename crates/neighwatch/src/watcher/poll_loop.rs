//! Level-triggered `poll(2)` event loop
//!
//! The host drives the loop by calling [`PollLoop::turn`]. Every turn polls
//! all armed registrations once and dispatches in registration order, so a
//! descriptor that stays readable is reported again on the next turn.

use super::event_loop::{EventLoop, ReadinessHandler, Token};
use crate::error::{NeighwatchError, Result};
use crate::types::{Interest, Readiness};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;
use tracing::{trace, warn};

struct Armed {
    interest: Interest,
    handler: Rc<dyn ReadinessHandler>,
}

struct Slot {
    fd: RawFd,
    armed: Option<Armed>,
}

/// Single-threaded reactor over `poll(2)`
#[derive(Default)]
pub struct PollLoop {
    slots: RefCell<BTreeMap<Token, Slot>>,
    next_token: Cell<Token>,
}

impl PollLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live registrations, armed or not
    pub fn registrations(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Number of armed registrations
    pub fn active_registrations(&self) -> usize {
        self.slots
            .borrow()
            .values()
            .filter(|slot| slot.armed.is_some())
            .count()
    }

    /// Poll armed registrations once and dispatch ready ones
    ///
    /// `None` blocks until something is ready. Returns the number of
    /// notifications that reached a callback; a dispatch that only stopped
    /// its watcher, or reported nothing the interest asked for, is not
    /// counted. With nothing armed it returns immediately.
    pub fn turn(&self, timeout: Option<Duration>) -> Result<usize> {
        let armed: Vec<(Token, RawFd, Interest)> = self
            .slots
            .borrow()
            .iter()
            .filter_map(|(token, slot)| slot.armed.as_ref().map(|a| (*token, slot.fd, a.interest)))
            .collect();
        if armed.is_empty() {
            return Ok(0);
        }

        // SAFETY: registered descriptors stay open until deregistered, and
        // nothing is deregistered while the poll call runs.
        let mut fds: Vec<PollFd<'_>> = armed
            .iter()
            .map(|(_, fd, interest)| {
                PollFd::new(unsafe { BorrowedFd::borrow_raw(*fd) }, poll_flags(*interest))
            })
            .collect();

        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(d) => PollTimeout::try_from(d).unwrap_or(PollTimeout::MAX),
        };
        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(0),
            Err(errno) => return Err(NeighwatchError::Io(io::Error::from(errno))),
        }
        let revents: Vec<PollFlags> = fds
            .iter()
            .map(|pfd| pfd.revents().unwrap_or(PollFlags::empty()))
            .collect();
        drop(fds);

        let mut delivered = 0;
        for ((token, fd, _), revents) in armed.iter().zip(revents) {
            if revents.is_empty() {
                continue;
            }
            if revents.contains(PollFlags::POLLNVAL) {
                warn!(fd, token, "Polled descriptor is not open");
            }

            // An earlier handler in this turn may have stopped this one
            let handler = match self.slots.borrow().get(token).and_then(|s| s.armed.as_ref()) {
                Some(armed) => armed.handler.clone(),
                None => continue,
            };

            trace!(fd, token, revents = revents.bits(), "Dispatching readiness");
            if handler.on_ready(readiness_from_revents(revents)) {
                delivered += 1;
            }
        }

        Ok(delivered)
    }
}

impl EventLoop for PollLoop {
    fn register(&self, fd: RawFd) -> Result<Token> {
        if fd < 0 {
            return Err(NeighwatchError::Type(format!(
                "descriptor must be non-negative, got {fd}"
            )));
        }
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.slots.borrow_mut().insert(token, Slot { fd, armed: None });
        Ok(token)
    }

    fn arm(&self, token: Token, interest: Interest, handler: Rc<dyn ReadinessHandler>) -> Result<()> {
        let previous = {
            let mut slots = self.slots.borrow_mut();
            let slot = slots
                .get_mut(&token)
                .ok_or_else(|| NeighwatchError::State(format!("unknown registration {token}")))?;
            slot.armed.replace(Armed { interest, handler })
        };
        drop(previous);
        Ok(())
    }

    fn disarm(&self, token: Token) {
        let previous = self
            .slots
            .borrow_mut()
            .get_mut(&token)
            .and_then(|slot| slot.armed.take());
        drop(previous);
    }

    fn is_armed(&self, token: Token) -> bool {
        self.slots
            .borrow()
            .get(&token)
            .is_some_and(|slot| slot.armed.is_some())
    }

    fn deregister(&self, token: Token) {
        let removed = self.slots.borrow_mut().remove(&token);
        drop(removed);
    }
}

fn poll_flags(interest: Interest) -> PollFlags {
    let mut flags = PollFlags::empty();
    if interest.readable {
        flags |= PollFlags::POLLIN;
    }
    if interest.writable {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn readiness_from_revents(revents: PollFlags) -> Readiness {
    let error = PollFlags::POLLERR | PollFlags::POLLNVAL;
    Readiness::new(
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLPRI | PollFlags::POLLHUP | error),
        revents.intersects(PollFlags::POLLOUT | error),
    )
}

/// Current readiness of one open descriptor without blocking
pub(crate) fn poll_now(fd: BorrowedFd<'_>, interest: Interest) -> io::Result<Readiness> {
    let mut fds = [PollFd::new(fd, poll_flags(interest))];
    poll(&mut fds, PollTimeout::ZERO).map_err(io::Error::from)?;
    Ok(readiness_from_revents(
        fds[0].revents().unwrap_or(PollFlags::empty()),
    ))
}
