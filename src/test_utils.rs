//! Shared helpers for unit tests.

use std::os::unix::io::RawFd;

/// Initializes tracing output for tests. Idempotent.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Standard per-test preamble: logging plus a start marker.
pub fn init_test(name: &str) {
    init_test_logging();
    crate::test_phase!(name);
}

/// Phase tracking macro for structured test logging.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(test = $name, "=== TEST START ===");
    };
}

/// Marks a section within a test.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::info!(section = $name, "--- section ---");
    };
}

/// Marks the successful end of a test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = $name, "=== TEST COMPLETE ===");
    };
}

/// Assertion with logging for better test output.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        if !$cond {
            tracing::error!(
                message = $msg,
                expected = ?$expected,
                actual = ?$actual,
                "Assertion failed"
            );
        }
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// A pipe end closed on drop.
#[derive(Debug)]
pub struct PipeEnd(RawFd);

impl PipeEnd {
    /// Returns the raw fd.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// Creates a nonblocking close-on-exec pipe, (read end, write end).
pub fn pipe_pair() -> (PipeEnd, PipeEnd) {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert!(ret == 0, "pipe failed: {}", std::io::Error::last_os_error());
    for fd in fds {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK);
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
    (PipeEnd(fds[0]), PipeEnd(fds[1]))
}

/// Writes a single byte into `fd`.
pub fn write_byte(fd: RawFd) {
    let byte = [1u8; 1];
    let ret = unsafe { libc::write(fd, byte.as_ptr().cast::<libc::c_void>(), 1) };
    assert!(ret == 1, "write failed: {}", std::io::Error::last_os_error());
}
