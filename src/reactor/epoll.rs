//! Native epoll backend (Linux).
//!
//! Every fd is armed with `EPOLLONESHOT`, so one readiness notification
//! disarms it until the scheduler re-arms via `modify`. An eventfd is
//! registered level-triggered (without oneshot) for cross-thread wakes;
//! its traffic is drained and filtered out of the results.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::reactor::{timeout_millis, Event, EventMask, Events, Reactor};
use crate::tracing_compat::trace;

const MAX_KERNEL_EVENTS: usize = 64;

/// Readiness backend over native epoll with oneshot arming.
#[derive(Debug)]
pub struct EpollReactor {
    epoll_fd: RawFd,
    wake_fd: RawFd,
}

fn mask_to_epoll(mask: EventMask) -> u32 {
    let mut bits = 0u32;
    if mask.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if mask.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    if mask.is_remote_close() {
        bits |= libc::EPOLLRDHUP as u32;
    }
    bits
}

fn epoll_to_mask(bits: u32) -> EventMask {
    let mut mask = EventMask::EMPTY;
    if bits & libc::EPOLLIN as u32 != 0 {
        mask = mask | EventMask::READABLE;
    }
    if bits & libc::EPOLLOUT as u32 != 0 {
        mask = mask | EventMask::WRITABLE;
    }
    if bits & (libc::EPOLLRDHUP as u32 | libc::EPOLLHUP as u32) != 0 {
        mask = mask | EventMask::REMOTE_CLOSE;
    }
    if bits & libc::EPOLLERR as u32 != 0 {
        mask = mask | EventMask::ERROR;
    }
    mask
}

impl EpollReactor {
    /// Creates an epoll instance and its wake eventfd.
    pub fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(err);
        }

        // The wake fd stays armed across deliveries; it is the one
        // registration that must not be oneshot.
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wake_fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epoll_fd);
            }
            return Err(err);
        }

        Ok(Self { epoll_fd, wake_fd })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mask: EventMask) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: mask_to_epoll(mask) | libc::EPOLLONESHOT as u32,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn drain_wake_fd(&self) {
        let mut buf = [0u8; 8];
        // Nonblocking; a failed read just means another drain got there.
        unsafe {
            libc::read(self.wake_fd, buf.as_mut_ptr().cast::<libc::c_void>(), 8);
        }
    }
}

impl Reactor for EpollReactor {
    fn add(&self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        trace!(fd, ?mask, "epoll add");
        self.ctl(libc::EPOLL_CTL_ADD, fd, mask)
    }

    fn modify(&self, fd: RawFd, mask: EventMask) -> io::Result<()> {
        trace!(fd, ?mask, "epoll modify");
        self.ctl(libc::EPOLL_CTL_MOD, fd, mask)
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // ENOENT / EBADF are expected when the fd was already closed.
            if err.raw_os_error() != Some(libc::ENOENT) && err.raw_os_error() != Some(libc::EBADF) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn poll(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();
        let mut kernel: [libc::epoll_event; MAX_KERNEL_EVENTS] =
            [libc::epoll_event { events: 0, u64: 0 }; MAX_KERNEL_EVENTS];
        let want = events.capacity().min(MAX_KERNEL_EVENTS) as libc::c_int;

        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                kernel.as_mut_ptr(),
                want,
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

        for slot in kernel.iter().take(n as usize) {
            let fd = slot.u64 as RawFd;
            if fd == self.wake_fd {
                self.drain_wake_fd();
                continue;
            }
            let ready = epoll_to_mask(slot.events);
            if !ready.is_empty() {
                events.push(Event { fd, ready });
            }
        }

        Ok(events.len())
    }

    fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.wake_fd,
                std::ptr::addr_of!(one).cast::<libc::c_void>(),
                8,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // A full eventfd counter already guarantees a pending wake.
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for EpollReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}
