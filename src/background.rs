//! Background read/write workers, the delegate capability record, and the
//! event-delivery dispatcher seam.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::PortError;
use crate::port::Port;
use crate::sync_io::INTERNAL_BUFFER_SIZE;

/// A weak back-reference capability object exposing the two background I/O
/// events. Modeled as a record of optional callbacks rather than a Cocoa
/// `@protocol`-style dynamic dispatch target. The port never retains the delegate —
/// callers hold an `Arc<dyn Delegate>` and hand the port a `Weak` via
/// [`Port::set_delegate`]; if the delegate has been dropped by the time an
/// event fires, the event is silently treated as "no observer".
pub trait Delegate: Send + Sync {
    /// Called with each chunk read by a background read worker. A
    /// zero-length `data` marks the worker having stopped due to a fatal
    /// error or end-of-stream.
    fn on_read_data(&self, _port: &Arc<Port>, _data: &[u8]) {}

    /// Called periodically by a background write worker once the estimated
    /// total duration exceeds the ~3 second threshold.
    fn on_write_progress(&self, _port: &Arc<Port>, _sent: usize, _total: usize) {}
}

/// The seam standing in for "the application's main dispatch queue".
/// Implementations decide where/how a posted event callback actually
/// runs; the default just runs it inline on the worker thread.
pub trait Dispatcher: Send + Sync {
    /// Runs `job`, however this dispatcher sees fit (inline, queued onto
    /// another thread, marshalled to a GUI event loop, ...).
    fn dispatch(&self, job: Box<dyn FnOnce() + Send>);
}

/// Default dispatcher: runs the job immediately, on the calling (worker)
/// thread.
#[derive(Debug, Copy, Clone, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

impl Port {
    /// Spawns a background read worker. The worker loops: wait for
    /// readiness, read an opportunistic chunk, post `on_read_data`. Exits on
    /// `stop_background_read`, port close, or a fatal read error (in which
    /// case it posts a final zero-length event and logs the error).
    ///
    /// Only one background read worker may be active per port at a time;
    /// calling this while one is already running is a no-op.
    pub fn start_background_read(self: &Arc<Self>) {
        if self.active_readers.load(Ordering::SeqCst) > 0 {
            return;
        }

        self.stop_read.store(false, Ordering::SeqCst);
        self.active_readers.fetch_add(1, Ordering::SeqCst);

        let port = Arc::clone(self);
        thread::spawn(move || {
            background_read_loop(&port);
            port.active_readers.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Requests the active background read worker to stop. The flag is
    /// checked between iterations and during short waits; this call does
    /// not block until the worker has actually exited.
    pub fn stop_background_read(&self) {
        self.stop_read.store(true, Ordering::SeqCst);
    }

    /// Spawns a background write worker holding its own copy of `data`.
    /// Writes in chunks, posting `on_write_progress` once the task is
    /// estimated to exceed ~3 seconds. Honours `stop_background_write`
    /// between chunks.
    ///
    /// Only one background write worker may be active per port; calling
    /// this while one is already running is a no-op.
    pub fn start_background_write(self: &Arc<Self>, data: Vec<u8>) {
        if self.active_writers.load(Ordering::SeqCst) > 0 {
            return;
        }

        self.stop_write.store(false, Ordering::SeqCst);
        self.active_writers.fetch_add(1, Ordering::SeqCst);

        let port = Arc::clone(self);
        thread::spawn(move || {
            background_write_loop(&port, data);
            port.active_writers.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Requests all active background write workers to stop between
    /// chunks.
    pub fn stop_background_write(&self) {
        self.stop_write.store(true, Ordering::SeqCst);
    }

    /// Number of currently active background write workers (primarily for
    /// shutdown orchestration).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.active_writers.load(Ordering::SeqCst)
    }

    fn post_read_data(&self, port: &Arc<Port>, data: Vec<u8>) {
        let Some(delegate) = self.delegate.lock().unwrap().as_ref().and_then(std::sync::Weak::upgrade) else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher.lock().unwrap());
        let port = Arc::clone(port);
        dispatcher.dispatch(Box::new(move || delegate.on_read_data(&port, &data)));
    }

    fn post_write_progress(&self, port: &Arc<Port>, sent: usize, total: usize) {
        let Some(delegate) = self.delegate.lock().unwrap().as_ref().and_then(std::sync::Weak::upgrade) else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher.lock().unwrap());
        let port = Arc::clone(port);
        dispatcher.dispatch(Box::new(move || delegate.on_write_progress(&port, sent, total)));
    }
}

fn background_read_loop(port: &Arc<Port>) {
    loop {
        if port.stop_read.load(Ordering::SeqCst) || !port.is_open() {
            return;
        }

        match port.read_chunk_blocking_long_poll() {
            Ok(Some(chunk)) if !chunk.is_empty() => {
                port.post_read_data(port, chunk);
            }
            Ok(Some(_)) => {
                // Readiness woke us up with nothing to read (spurious or a
                // short poll interval expiring); loop and check stop flags.
            }
            Ok(None) => {
                // End of stream.
                port.post_read_data(port, Vec::new());
                return;
            }
            Err(err) => {
                log::error!(
                    "background read on {} stopped after a fatal error: {err}",
                    port.bsd_path()
                );
                port.post_read_data(port, Vec::new());
                return;
            }
        }
    }
}

/// Progress reporting begins once the estimated total duration for the
/// write exceeds this threshold. The exact cadence is heuristic; any
/// cadence delivering at least one event before user-noticeable delay is
/// acceptable.
const PROGRESS_THRESHOLD: Duration = Duration::from_secs(3);

fn background_write_loop(port: &Arc<Port>, data: Vec<u8>) {
    let total = data.len();
    let mut sent = 0usize;
    let started = Instant::now();
    let mut reporting = false;

    while sent < total {
        if port.stop_write.load(Ordering::SeqCst) || !port.is_open() {
            return;
        }

        let chunk_end = (sent + INTERNAL_BUFFER_SIZE).min(total);
        match port.write(&data[sent..chunk_end]) {
            Ok(()) => sent = chunk_end,
            Err(PortError::OnlySomeDataWritten { written, .. }) => {
                sent += written;
                log::error!(
                    "background write on {} made partial progress then failed",
                    port.bsd_path()
                );
                return;
            }
            Err(err) => {
                log::error!("background write on {} stopped: {err}", port.bsd_path());
                return;
            }
        }

        if !reporting && started.elapsed() > PROGRESS_THRESHOLD {
            reporting = true;
        }
        if reporting {
            port.post_write_progress(port, sent, total);
        }
    }
}

impl Port {
    /// Waits (potentially indefinitely, via a long poll interval) for
    /// readiness and reads one opportunistic chunk, sized by
    /// `bytes_to_read` when available. Returns `Ok(None)` on EOF.
    fn read_chunk_blocking_long_poll(&self) -> Result<Option<Vec<u8>>, PortError> {
        let _read_guard = self.read_lock.lock().unwrap();
        let fd = {
            let inner = self.inner.lock().unwrap();
            inner
                .fd
                .ok_or_else(|| PortError::Fatal(std::io::Error::from(std::io::ErrorKind::NotConnected)))?
        };

        let ready = crate::sync_io::wait_readable_long_poll(fd, Duration::from_millis(200))?;
        if !ready {
            return Ok(Some(Vec::new()));
        }

        let mut buf = [0u8; INTERNAL_BUFFER_SIZE];
        match nix::unistd::read(fd, &mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(buf[..n].to_vec())),
            Err(nix::Error::EAGAIN) => Ok(Some(Vec::new())),
            Err(e) => Err(PortError::Fatal(std::io::Error::from(e))),
        }
    }
}
