//! Portable `poll(2)` backend.
//!
//! `poll(2)` has no oneshot mode, so it is emulated: delivering an
//! event clears the fd's armed mask, and the fd is skipped when
//! building the poll set until `modify` re-arms it. A self-pipe
//! provides the cross-thread wake.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use parking_lot::Mutex;

use crate::reactor::{timeout_millis, Event, EventMask, Events, Reactor};
use crate::tracing_compat::trace;

/// Readiness backend over `poll(2)` with emulated oneshot arming.
#[derive(Debug)]
pub struct PollReactor {
    /// fd -> armed mask. An empty mask keeps the registration but
    /// leaves the fd out of the poll set (oneshot-drained).
    armed: Mutex<HashMap<RawFd, EventMask>>,
    wake_read: RawFd,
    wake_write: RawFd,
}

fn mask_to_poll(mask: EventMask) -> libc::c_short {
    let mut bits: libc::c_short = 0;
    if mask.is_readable() {
        bits |= libc::POLLIN;
    }
    if mask.is_writable() {
        bits |= libc::POLLOUT;
    }
    #[cfg(target_os = "linux")]
    if mask.is_remote_close() {
        bits |= libc::POLLRDHUP;
    }
    bits
}

fn poll_to_mask(bits: libc::c_short) -> EventMask {
    let mut mask = EventMask::EMPTY;
    if bits & libc::POLLIN != 0 {
        mask = mask | EventMask::READABLE;
    }
    if bits & libc::POLLOUT != 0 {
        mask = mask | EventMask::WRITABLE;
    }
    if bits & libc::POLLHUP != 0 {
        mask = mask | EventMask::REMOTE_CLOSE;
    }
    #[cfg(target_os = "linux")]
    if bits & libc::POLLRDHUP != 0 {
        mask = mask | EventMask::REMOTE_CLOSE;
    }
    if bits & (libc::POLLERR | libc::POLLNVAL) != 0 {
        mask = mask | EventMask::ERROR;
    }
    mask
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        if libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl PollReactor {
    /// Creates the backend and its wake pipe.
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let (wake_read, wake_write) = (fds[0], fds[1]);
        for fd in [wake_read, wake_write] {
            if let Err(err) = set_nonblocking_cloexec(fd) {
                unsafe {
                    libc::close(wake_read);
                    libc::close(wake_write);
                }
                return Err(err);
            }
        }
        Ok(Self {
            armed: Mutex::new(HashMap::new()),
            wake_read,
            wake_write,
        })
    }

    fn drain_wake_pipe(&self) {
        let mut buf = [0u8; 32];
        loop {
            let n = unsafe {
                libc::read(
                    self.wake_read,
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };
            if n < buf.len() as isize {
                break;
            }
        }
    }
}

impl Reactor for PollReactor {
    fn add(&self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        trace!(fd, ?mask, "poll add");
        self.armed.lock().insert(fd, mask);
        Ok(())
    }

    fn modify(&self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        trace!(fd, ?mask, "poll modify");
        match self.armed.lock().get_mut(&fd) {
            Some(slot) => {
                *slot = mask;
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.armed.lock().remove(&fd);
        Ok(())
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();

        let mut pollfds: Vec<libc::pollfd> = vec![libc::pollfd {
            fd: self.wake_read,
            events: libc::POLLIN,
            revents: 0,
        }];
        {
            let armed = self.armed.lock();
            for (&fd, &mask) in armed.iter() {
                if !mask.is_empty() {
                    pollfds.push(libc::pollfd {
                        fd,
                        events: mask_to_poll(mask),
                        revents: 0,
                    });
                }
            }
        }

        let n = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        let mut armed = self.armed.lock();
        for pollfd in &pollfds {
            if pollfd.revents == 0 {
                continue;
            }
            if pollfd.fd == self.wake_read {
                self.drain_wake_pipe();
                continue;
            }
            let ready = poll_to_mask(pollfd.revents);
            if ready.is_empty() {
                continue;
            }
            // Oneshot emulation: disarm until the next modify.
            if let Some(slot) = armed.get_mut(&pollfd.fd) {
                *slot = EventMask::EMPTY;
            }
            if !events.push(Event {
                fd: pollfd.fd,
                ready,
            }) {
                break;
            }
        }

        Ok(events.len())
    }

    fn wake(&self) -> io::Result<()> {
        let byte = [0u8; 1];
        let ret = unsafe { libc::write(self.wake_write, byte.as_ptr().cast::<libc::c_void>(), 1) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full pipe already guarantees a pending wake.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for PollReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.wake_write);
        }
    }
}
