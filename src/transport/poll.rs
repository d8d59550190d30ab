//! Readiness polling over raw descriptors
//!
//! Thin wrapper around `poll(2)`: the engine polls at most two descriptors
//! (input and socket) per iteration and this is its only blocking call.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Events to wait for on one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    fn events(self) -> libc::c_short {
        let mut events = 0;
        if self.read {
            events |= libc::POLLIN;
        }
        if self.write {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Events reported for one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl Readiness {
    fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            hangup: revents & libc::POLLHUP != 0,
        }
    }

    /// Any event at all
    pub fn any(&self) -> bool {
        self.readable || self.writable || self.error || self.hangup
    }
}

/// Result of one poll call
#[derive(Debug, Clone, Copy, Default)]
pub struct PollOutcome {
    /// Per-slot readiness, in the order the slots were given
    pub slots: [Readiness; 2],
    /// Number of descriptors with events
    pub ready: usize,
    /// The call was interrupted by a signal
    pub interrupted: bool,
}

impl PollOutcome {
    /// The timeout expired without events
    pub fn timed_out(&self) -> bool {
        self.ready == 0 && !self.interrupted
    }
}

fn timeout_millis(timeout: Duration) -> libc::c_int {
    // round up so a sub-millisecond wait does not become a busy loop
    let ms = timeout.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

/// Wait until a slot is ready or `timeout` expires
///
/// `None` slots are skipped by the kernel (descriptor -1).
pub fn poll_slots(
    slots: [Option<(RawFd, Interest)>; 2],
    timeout: Duration,
) -> io::Result<PollOutcome> {
    let mut fds = slots.map(|slot| match slot {
        Some((fd, interest)) => libc::pollfd {
            fd,
            events: interest.events(),
            revents: 0,
        },
        None => libc::pollfd {
            fd: -1,
            events: 0,
            revents: 0,
        },
    });

    // SAFETY: `fds` is a valid, initialised array whose length is passed
    // along with the pointer; poll only writes `revents`.
    let res = unsafe {
        libc::poll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };

    if res < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(PollOutcome {
                interrupted: true,
                ..Default::default()
            });
        }
        return Err(err);
    }

    Ok(PollOutcome {
        slots: [
            Readiness::from_revents(fds[0].revents),
            Readiness::from_revents(fds[1].revents),
        ],
        ready: res as usize,
        interrupted: false,
    })
}
