//! Bounded blocking reads and whole-buffer writes.
//!
//! All synchronous reads share the single internal buffer ceiling (4096
//! bytes) and the common readiness-wait-then-read outer loop described in
//! the one place that loop is written.

use std::io;
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{read as nix_read, write as nix_write};

use crate::error::{EndCode, PortError, Result};
use crate::port::Port;

/// Internal read buffer ceiling: 4096 bytes.
pub const INTERNAL_BUFFER_SIZE: usize = 4096;

/// What should stop a synchronous read.
#[derive(Debug, Clone, Copy)]
enum ReadMode {
    /// Stop only on EOF, timeout, or internal buffer exhaustion.
    Unbounded,
    /// Stop once `len` bytes have accumulated (or earlier per other rules).
    Length(usize),
    /// Stop once a chunk ends with `stop_char`.
    UpToChar(u8),
    /// Stop at whichever of length or stop-char comes first.
    LengthOrChar(usize, u8),
}

impl Port {
    /// Blocking read bounded only by the read timeout, EOF, or the internal
    /// buffer filling up. Equivalent to the original's plain
    /// `readAndReturnError:`.
    pub fn read(&self) -> Result<(Vec<u8>, EndCode)> {
        self.bounded_read(ReadMode::Unbounded)
    }

    /// Blocking read that stops once `length` bytes have been accumulated.
    pub fn read_bytes(&self, length: usize) -> Result<(Vec<u8>, EndCode)> {
        self.bounded_read(ReadMode::Length(length))
    }

    /// Blocking read that stops once a read chunk ends with `stop_char`.
    /// Detected at chunk boundary, not earliest in-stream occurrence:
    /// callers wanting first-occurrence framing must read byte-by-byte
    /// themselves.
    pub fn read_up_to_char(&self, stop_char: u8) -> Result<(Vec<u8>, EndCode)> {
        self.bounded_read(ReadMode::UpToChar(stop_char))
    }

    /// Blocking read that stops at whichever of `length` or `stop_char`
    /// comes first.
    pub fn read_bytes_up_to_char(&self, length: usize, stop_char: u8) -> Result<(Vec<u8>, EndCode)> {
        self.bounded_read(ReadMode::LengthOrChar(length, stop_char))
    }

    /// Decodes a plain read with `decode` (defaulting callers should pass
    /// `|b| std::str::from_utf8(b).ok().map(str::to_owned)`). A decode
    /// failure returns `None` for the string but the bytes are still
    /// consumed from the driver — matching the original's documented
    /// behavior for multi-byte encodings split across a read boundary.
    pub fn read_string_using(
        &self,
        decode: impl FnOnce(&[u8]) -> Option<String>,
    ) -> Result<(Option<String>, EndCode)> {
        let (bytes, end) = self.read()?;
        Ok((decode(&bytes), end))
    }

    /// Writes `string` encoded via `encode`, returning `false` if encoding
    /// fails (mirrors `writeString:usingEncoding:error:`).
    pub fn write_string_using(
        &self,
        string: &str,
        encode: impl FnOnce(&str) -> Option<Vec<u8>>,
    ) -> Result<()> {
        match encode(string) {
            Some(bytes) => self.write(&bytes),
            None => Err(PortError::NoDataToWrite),
        }
    }

    fn bounded_read(&self, mode: ReadMode) -> Result<(Vec<u8>, EndCode)> {
        let _read_guard = self.read_lock.lock().unwrap();

        let fd = {
            let inner = self.inner.lock().unwrap();
            inner.fd.ok_or_else(|| {
                PortError::Fatal(io::Error::from(io::ErrorKind::NotConnected))
            })?
        };

        let timeout = self.read_timeout();
        let deadline = Instant::now() + timeout;
        let mut accumulated: Vec<u8> = Vec::new();
        let mut buf = [0u8; INTERNAL_BUFFER_SIZE];

        loop {
            if let ReadMode::Length(len) | ReadMode::LengthOrChar(len, _) = mode {
                if accumulated.len() >= len {
                    return Ok((accumulated, EndCode::StopLengthReached));
                }
            }
            if accumulated.len() >= INTERNAL_BUFFER_SIZE {
                return Err(PortError::InternalBufferFull { partial: accumulated });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && timeout > Duration::ZERO {
                return Err(PortError::Timeout {
                    timeout,
                    partial: accumulated,
                });
            }

            let ready = wait_readable(fd, remaining)?;
            if !ready {
                return Err(PortError::Timeout {
                    timeout,
                    partial: accumulated,
                });
            }

            let want = match mode {
                ReadMode::Length(len) | ReadMode::LengthOrChar(len, _) => {
                    (len - accumulated.len()).min(INTERNAL_BUFFER_SIZE - accumulated.len())
                }
                _ => INTERNAL_BUFFER_SIZE - accumulated.len(),
            }
            .max(1);

            let n = match nix_read(fd, &mut buf[..want]) {
                Ok(n) => n,
                Err(nix::Error::EAGAIN) => continue,
                Err(e) => return Err(PortError::Fatal(io::Error::from(e))),
            };

            if n == 0 {
                return Ok((accumulated, EndCode::EndOfStream));
            }

            accumulated.extend_from_slice(&buf[..n]);

            let stop_char_hit = match mode {
                ReadMode::UpToChar(c) | ReadMode::LengthOrChar(_, c) => {
                    accumulated.last() == Some(&c)
                }
                _ => false,
            };
            if stop_char_hit {
                return Ok((accumulated, EndCode::StopCharReached));
            }

            if let ReadMode::Length(len) | ReadMode::LengthOrChar(len, _) = mode {
                if accumulated.len() == len {
                    return Ok((accumulated, EndCode::StopLengthReached));
                }
                if accumulated.len() > len {
                    return Err(PortError::Fatal(io::Error::new(
                        io::ErrorKind::Other,
                        "internal: read accumulated past requested length",
                    )));
                }
            }
            if accumulated.len() > INTERNAL_BUFFER_SIZE {
                return Err(PortError::InternalBufferFull { partial: accumulated });
            }
        }
    }

    /// Writes the entire buffer, looping over `write(2)` until everything
    /// is sent or an error occurs. Refuses an empty buffer with
    /// `NoDataToWrite`. If some but not all bytes were sent before a fatal
    /// errno, fails with `OnlySomeDataWritten` reporting the count.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(PortError::NoDataToWrite);
        }

        let _write_guard = self.write_lock.lock().unwrap();
        let fd = {
            let inner = self.inner.lock().unwrap();
            inner.fd.ok_or_else(|| {
                PortError::Fatal(io::Error::from(io::ErrorKind::NotConnected))
            })?
        };

        let mut written = 0usize;
        while written < data.len() {
            match nix_write(unsafe { BorrowedFd::borrow_raw(fd) }, &data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(nix::Error::EAGAIN) => {
                    let _ = wait_writable(fd, Duration::from_millis(50));
                }
                Err(e) => {
                    if written > 0 {
                        return Err(PortError::OnlySomeDataWritten {
                            written,
                            requested: data.len(),
                        });
                    }
                    return Err(PortError::Fatal(io::Error::from(e)));
                }
            }
        }

        if written < data.len() {
            return Err(PortError::OnlySomeDataWritten {
                written,
                requested: data.len(),
            });
        }
        Ok(())
    }
}

fn wait_readable(fd: std::os::fd::RawFd, timeout: Duration) -> Result<bool> {
    wait_for(fd, PollFlags::POLLIN, timeout)
}

fn wait_writable(fd: std::os::fd::RawFd, timeout: Duration) -> Result<bool> {
    wait_for(fd, PollFlags::POLLOUT, timeout)
}

/// Waits for readability with a single bounded poll call. Used by the
/// background read worker, which re-polls in a loop rather than blocking
/// indefinitely so it can observe the cooperative stop flag between waits.
pub(crate) fn wait_readable_long_poll(fd: std::os::fd::RawFd, poll_interval: Duration) -> Result<bool> {
    wait_readable(fd, poll_interval)
}

fn wait_for(fd: std::os::fd::RawFd, flags: PollFlags, timeout: Duration) -> Result<bool> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, flags)];
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let n = poll(&mut fds, millis).map_err(|e| PortError::Fatal(io::Error::from(e)))?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::os::fd::AsRawFd;

    fn open_pipe_port() -> (Port, nix::unistd::OwnedFd) {
        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let port = Port::new(
            "/dev/cu.fake",
            "fake",
            crate::port::PortKind::RS232,
            BTreeMap::new(),
        );
        // Poke the fd directly through the test-only seam: ports created
        // from discovery always go through `open`, but exercising the sync
        // I/O loop against a real TTY isn't available in this environment,
        // so tests substitute a pipe fd while keeping the same call paths.
        nix::fcntl::fcntl(
            read_fd.as_raw_fd(),
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .unwrap();
        {
            let mut inner = port.inner.lock().unwrap();
            inner.fd = Some(read_fd.as_raw_fd());
            inner.options = Some(crate::options::PortOptions::default());
            inner.original_options = Some(crate::options::PortOptions::default());
        }
        std::mem::forget(read_fd);
        port.set_read_timeout(Duration::from_millis(250)).unwrap();
        (port, write_fd)
    }

    #[test]
    fn read_bytes_stops_at_requested_length() {
        let (port, write_fd) = open_pipe_port();
        nix::unistd::write(&write_fd, b"PING\n").unwrap();
        let (bytes, end) = port.read_bytes(5).unwrap();
        assert_eq!(bytes, b"PING\n");
        assert_eq!(end, EndCode::StopLengthReached);
    }

    #[test]
    fn read_up_to_char_stops_at_chunk_boundary() {
        let (port, write_fd) = open_pipe_port();
        nix::unistd::write(&write_fd, b"hello\n").unwrap();
        let (bytes, end) = port.read_up_to_char(b'\n').unwrap();
        assert_eq!(bytes, b"hello\n");
        assert_eq!(end, EndCode::StopCharReached);
    }

    #[test]
    fn read_times_out_with_no_peer_activity() {
        let (port, _write_fd) = open_pipe_port();
        let start = Instant::now();
        let err = port.read_bytes(5).unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(600));
        match err {
            PortError::Timeout { partial, .. } => assert!(partial.is_empty()),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn write_rejects_empty_buffer() {
        let (port, _write_fd) = open_pipe_port();
        let err = port.write(&[]).unwrap_err();
        assert!(matches!(err, PortError::NoDataToWrite));
    }
}
