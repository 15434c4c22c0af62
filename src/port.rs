//! The port handle: exclusive ownership, open/close lifecycle, and the
//! termios-style options commit protocol.
//!
//! Sync I/O (`src/sync_io.rs`) and background I/O (`src/background.rs`) are
//! implemented as additional `impl Port` blocks in their own files, per the
//! "category-style extension" design note: one cohesive type, grouped
//! methods, rather than a per-feature struct split.

use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices as SCI,
    Termios,
};
use nix::unistd::close as nix_close;

use crate::background::{Delegate, Dispatcher, InlineDispatcher};
use crate::options::{FlowFlags, PortOptions};

nix::ioctl_none_bad!(tiocexcl, nix::libc::TIOCEXCL);
nix::ioctl_none_bad!(tiocnxcl, nix::libc::TIOCNXCL);
nix::ioctl_write_ptr_bad!(tiocmbis, nix::libc::TIOCMBIS, nix::libc::c_int);
nix::ioctl_write_ptr_bad!(tiocmbic, nix::libc::TIOCMBIC, nix::libc::c_int);
nix::ioctl_read_bad!(fionread, nix::libc::FIONREAD, nix::libc::c_int);

/// The closed set of IOKit-style service types a port can be classified as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortKind {
    /// Matches any service type.
    AllTypes,
    /// A modem-class device.
    Modem,
    /// An RS-232 device.
    RS232,
}

/// An opaque ownership token. Two tokens are equal iff they originated from
/// the same [`OwnerToken::new`] call (identity, not structural equality) —
/// cloning preserves identity, a fresh `new()` never compares equal to any
/// other token.
#[derive(Debug, Clone)]
pub struct OwnerToken(Arc<()>);

impl OwnerToken {
    /// Mints a fresh, uniquely-identified ownership token.
    #[must_use]
    pub fn new() -> Self {
        OwnerToken(Arc::new(()))
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for OwnerToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for OwnerToken {}

pub(crate) struct PortInner {
    pub(crate) fd: Option<RawFd>,
    pub(crate) options: Option<PortOptions>,
    pub(crate) original_options: Option<PortOptions>,
    /// The last snapshot actually accepted by `commit_changes()` (seeded
    /// from `original_options` at `open()`). `options` reverts to this on a
    /// failed commit, so a rejected change never lingers in the cache that
    /// `options()`/`current_options()` read from.
    pub(crate) committed_options: Option<PortOptions>,
}

/// A serial port: identity, ownership, open/close lifecycle, options commit
/// protocol, synchronous I/O, and background I/O all live on this one type.
///
/// Invariant: a port is either closed (`fd` absent, both
/// options snapshots absent) or open (`fd` present, both snapshots present).
pub struct Port {
    bsd_path: String,
    service_name: String,
    service_type: PortKind,
    properties: BTreeMap<String, String>,

    pub(crate) inner: Mutex<PortInner>,
    owner: Mutex<Option<OwnerToken>>,
    read_timeout: Mutex<Duration>,
    last_error: Mutex<Option<io::Error>>,

    pub(crate) read_lock: Mutex<()>,
    pub(crate) write_lock: Mutex<()>,
    close_lock: Mutex<()>,

    pub(crate) stop_read: Arc<AtomicBool>,
    pub(crate) stop_write: Arc<AtomicBool>,
    pub(crate) active_readers: Arc<AtomicUsize>,
    pub(crate) active_writers: Arc<AtomicUsize>,

    pub(crate) delegate: Mutex<Option<Weak<dyn Delegate>>>,
    pub(crate) dispatcher: Mutex<Arc<dyn Dispatcher>>,
}

impl Port {
    /// Creates a new, closed port record. Called by the registry when a
    /// device is discovered; identity is `bsd_path` for the port's lifetime.
    #[must_use]
    pub fn new(
        bsd_path: impl Into<String>,
        service_name: impl Into<String>,
        service_type: PortKind,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Port {
            bsd_path: bsd_path.into(),
            service_name: service_name.into(),
            service_type,
            properties,
            inner: Mutex::new(PortInner {
                fd: None,
                options: None,
                original_options: None,
                committed_options: None,
            }),
            owner: Mutex::new(None),
            read_timeout: Mutex::new(Duration::from_secs(0)),
            last_error: Mutex::new(None),
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            close_lock: Mutex::new(()),
            stop_read: Arc::new(AtomicBool::new(false)),
            stop_write: Arc::new(AtomicBool::new(false)),
            active_readers: Arc::new(AtomicUsize::new(0)),
            active_writers: Arc::new(AtomicUsize::new(0)),
            delegate: Mutex::new(None),
            dispatcher: Mutex::new(Arc::new(InlineDispatcher)),
        }
    }

    /// The device node path, e.g. `/dev/cu.usbserial-XYZ`. This is the
    /// port's identity.
    #[must_use]
    pub fn bsd_path(&self) -> &str {
        &self.bsd_path
    }

    /// The short human-readable service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The service type classification.
    #[must_use]
    pub fn service_type(&self) -> PortKind {
        self.service_type
    }

    /// OS registry metadata (vendor/product strings, serial numbers, ...),
    /// populated by the discovery backend. Empty when unknown.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Sets the delegate that receives background I/O events. Held weakly:
    /// the port never keeps the delegate alive.
    pub fn set_delegate(&self, delegate: &Arc<dyn Delegate>) {
        *self.delegate.lock().unwrap() = Some(Arc::downgrade(delegate));
    }

    /// Clears the delegate.
    pub fn clear_delegate(&self) {
        *self.delegate.lock().unwrap() = None;
    }

    /// Installs a custom event dispatcher, replacing the default
    /// [`InlineDispatcher`].
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn Dispatcher>) {
        *self.dispatcher.lock().unwrap() = dispatcher;
    }

    /// Current read timeout used by synchronous reads.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        *self.read_timeout.lock().unwrap()
    }

    /// Sets the read timeout. `Duration` cannot represent NaN or negative
    /// values, so the only rejection this performs is guarding against
    /// pathologically large values that would overflow timeout arithmetic.
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), crate::error::PortError> {
        if timeout > Duration::from_secs(60 * 60 * 24 * 365) {
            return Err(crate::error::PortError::Fatal(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read timeout must be finite and bounded",
            )));
        }
        *self.read_timeout.lock().unwrap() = timeout;
        Ok(())
    }

    // ---- Ownership -------------------------------------------------

    /// Atomically claims ownership for `token` if the port is currently
    /// unowned. Returns `true` on success. Not a lock on I/O — a social
    /// contract for higher layers.
    pub fn try_claim(&self, token: OwnerToken) -> bool {
        let mut owner = self.owner.lock().unwrap();
        if owner.is_none() {
            *owner = Some(token);
            true
        } else {
            false
        }
    }

    /// Releases ownership. If open, closes the port first. Safe to call on
    /// an unclaimed or already-closed port (idempotent).
    pub fn release(&self) {
        if self.is_open() {
            self.close();
        }
        *self.owner.lock().unwrap() = None;
    }

    /// Whether the port is currently unowned.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.owner.lock().unwrap().is_none()
    }

    /// The current owner token, if any.
    #[must_use]
    pub fn owner(&self) -> Option<OwnerToken> {
        self.owner.lock().unwrap().clone()
    }

    /// Whether the port currently has an open descriptor.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().fd.is_some()
    }

    // ---- Open / close -----------------------------------------------

    /// Opens the device node with the given OS flags. Captures original
    /// options, copies them to current, and sets the descriptor
    /// non-blocking. Fails with `Fatal` carrying the OS error code if the
    /// descriptor cannot be obtained.
    pub fn open(&self, flags: OFlag) -> Result<(), crate::error::PortError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fd.is_some() {
            return Ok(());
        }

        let fd = open(self.bsd_path.as_str(), flags | OFlag::O_NOCTTY, Mode::empty())
            .map_err(|e| crate::error::PortError::Fatal(io::Error::from(e)))?;
        let close_on_err = scopeguard::guard(fd, |fd| {
            let _ = nix_close(fd);
        });

        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))
            .map_err(|e| crate::error::PortError::Fatal(io::Error::from(e)))?;

        let termios = termios::tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) })
            .map_err(|e| crate::error::PortError::Fatal(io::Error::from(e)))?;
        let original = options_from_termios(&termios);

        scopeguard::ScopeGuard::into_inner(close_on_err);
        inner.fd = Some(fd);
        inner.original_options = Some(original.clone());
        inner.committed_options = Some(original.clone());
        inner.options = Some(original);
        Ok(())
    }

    /// Opens the device node for exclusive access: in addition to [`open`],
    /// acquires the OS-level `TIOCEXCL` advisory so a concurrent
    /// `open_exclusive` from another process fails with `EBUSY`.
    pub fn open_exclusive(&self, flags: OFlag) -> Result<(), crate::error::PortError> {
        self.open(flags)?;
        let fd = self.inner.lock().unwrap().fd.expect("just opened");
        unsafe { tiocexcl(fd) }.map_err(|e| crate::error::PortError::Fatal(io::Error::from(e)))?;
        Ok(())
    }

    /// Drains output, reapplies original options, releases the exclusive
    /// advisory, and closes the descriptor. Idempotent. Never fails
    /// visibly: any restoration error is swallowed.
    pub fn close(&self) {
        let _close_guard = self.close_lock.lock().unwrap();

        self.stop_read.store(true, std::sync::atomic::Ordering::SeqCst);
        self.stop_write.store(true, std::sync::atomic::Ordering::SeqCst);

        // Try to take read_lock/write_lock so we don't race an in-flight
        // syscall's buffer; if contended, proceed anyway after a brief
        // wait — the worker will observe EBADF on its next syscall once we
        // close the descriptor.
        let _read_guard = self
            .read_lock
            .try_lock()
            .ok()
            .or_else(|| {
                std::thread::sleep(Duration::from_millis(20));
                self.read_lock.try_lock().ok()
            });
        let _write_guard = self
            .write_lock
            .try_lock()
            .ok()
            .or_else(|| {
                std::thread::sleep(Duration::from_millis(20));
                self.write_lock.try_lock().ok()
            });

        let mut inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd.take() else {
            return;
        };

        let _ = termios::tcdrain(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) });
        if let Some(original) = inner.original_options.take() {
            if let Ok(mut termios) =
                termios::tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) })
            {
                apply_options_to_termios(&original, &mut termios);
                let _ = termios::tcsetattr(
                    unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
                    SetArg::TCSANOW,
                    &termios,
                );
            }
        }
        inner.options = None;
        inner.committed_options = None;

        let _ = unsafe { tiocnxcl(fd) };
        let _ = nix_close(fd);
    }

    /// Waits until all written data has been transmitted by the driver.
    pub fn drain_input(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd else { return false };
        termios::tcdrain(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }).is_ok()
    }

    /// Discards buffered data. At least one of `flush_in`/`flush_out` must
    /// be `true`.
    pub fn flush(&self, flush_in: bool, flush_out: bool) -> bool {
        if !flush_in && !flush_out {
            return false;
        }
        let inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd else { return false };
        let which = match (flush_in, flush_out) {
            (true, true) => termios::FlushArg::TCIOFLUSH,
            (true, false) => termios::FlushArg::TCIFLUSH,
            (false, true) => termios::FlushArg::TCOFLUSH,
            (false, false) => unreachable!(),
        };
        termios::tcflush(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, which).is_ok()
    }

    /// Transmits a break condition on the line.
    pub fn send_break(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd else { return false };
        termios::tcsendbreak(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, 0).is_ok()
    }

    /// Asserts the DTR control signal.
    pub fn set_dtr(&self) -> bool {
        self.modem_bits(nix::libc::TIOCM_DTR, true)
    }

    /// Clears the DTR control signal.
    pub fn clear_dtr(&self) -> bool {
        self.modem_bits(nix::libc::TIOCM_DTR, false)
    }

    fn modem_bits(&self, bit: nix::libc::c_int, set: bool) -> bool {
        let inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd else { return false };
        let bits: nix::libc::c_int = bit;
        let result = if set {
            unsafe { tiocmbis(fd, &bits) }
        } else {
            unsafe { tiocmbic(fd, &bits) }
        };
        result.is_ok()
    }

    /// Number of bytes currently buffered by the driver and available to
    /// read without blocking.
    pub fn bytes_to_read(&self) -> io::Result<u32> {
        let inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };
        let mut n: nix::libc::c_int = 0;
        unsafe { fionread(fd, &mut n) }.map_err(io::Error::from)?;
        Ok(n.max(0) as u32)
    }

    // ---- Options commit protocol -------------------------------------

    /// Must be called before a batch of option changes; clears any
    /// previously stashed commit error.
    pub fn clear_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }

    /// The OS errno from the last failed [`Port::commit_changes`], or `0`.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        self.last_error
            .lock()
            .unwrap()
            .as_ref()
            .and_then(io::Error::raw_os_error)
            .unwrap_or(0)
    }

    /// Mutates the in-memory current options snapshot. Does not touch the
    /// driver; call [`Port::commit_changes`] afterwards.
    pub fn with_options_mut(&self, f: impl FnOnce(&mut PortOptions)) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(options) = inner.options.as_mut() {
            f(options);
        }
    }

    /// A copy of the in-memory current options snapshot, if open.
    #[must_use]
    pub fn current_options(&self) -> Option<PortOptions> {
        self.inner.lock().unwrap().options.clone()
    }

    /// Applies the current in-memory options snapshot to the driver in a
    /// single `tcsetattr` call. On failure, returns `false`, stashes the
    /// errno for [`Port::error_code`], and reverts the in-memory snapshot to
    /// the last successfully committed one — a rejected change never lingers
    /// in the cache that [`Port::options`]/[`Port::current_options`] read
    /// from. On success, the snapshot becomes the new "last committed"
    /// baseline.
    pub fn commit_changes(&self) -> bool {
        let _write_guard = self.write_lock.lock().unwrap();
        let mut inner = self.inner.lock().unwrap();
        let Some(fd) = inner.fd else {
            *self.last_error.lock().unwrap() =
                Some(io::Error::from(io::ErrorKind::NotConnected));
            return false;
        };
        let Some(options) = inner.options.clone() else {
            *self.last_error.lock().unwrap() =
                Some(io::Error::from(io::ErrorKind::NotConnected));
            return false;
        };

        match apply_termios_to_fd(fd, &options) {
            Ok(()) => {
                inner.committed_options = Some(options);
                true
            }
            Err(err) => {
                inner.options = inner.committed_options.clone();
                *self.last_error.lock().unwrap() = Some(err);
                false
            }
        }
    }

    /// Validates `mapping`'s `ServiceName`, applies each recognized key,
    /// and performs a single commit.
    pub fn set_options(
        &self,
        mapping: &crate::options::OptionsMapping,
    ) -> Result<(), crate::error::PortError> {
        let current = self.current_options().ok_or_else(|| {
            crate::error::PortError::Fatal(io::Error::from(io::ErrorKind::NotConnected))
        })?;
        let (updated, changed) =
            crate::options::apply_mapping(&self.service_name, &current, mapping).map_err(|e| {
                crate::error::PortError::Fatal(io::Error::new(io::ErrorKind::InvalidInput, e))
            })?;
        if changed.any {
            self.with_options_mut(|opts| *opts = updated);
            self.clear_error();
            if !self.commit_changes() {
                return Err(crate::error::PortError::Fatal(io::Error::from_raw_os_error(
                    self.error_code(),
                )));
            }
        }
        Ok(())
    }

    /// Lazily opens the port if closed to sample current values, then
    /// returns a fresh external mapping.
    pub fn options(&self) -> Result<crate::options::OptionsMapping, crate::error::PortError> {
        if !self.is_open() {
            self.open(OFlag::O_RDWR)?;
        }
        let current = self.current_options().ok_or_else(|| {
            crate::error::PortError::Fatal(io::Error::from(io::ErrorKind::NotConnected))
        })?;
        Ok(crate::options::to_mapping(&self.service_name, &current))
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("bsd_path", &self.bsd_path)
            .field("service_name", &self.service_name)
            .field("service_type", &self.service_type)
            .field("is_open", &self.is_open())
            .finish()
    }
}

/// Best-effort standard baud rate lookup. Arbitrary positive integers are
/// accepted by the options block; only the POSIX-standard subset can
/// actually be programmed into the driver through `nix`'s `BaudRate` enum,
/// so anything else surfaces as a commit failure.
fn standard_baud_rate(n: u32) -> Option<BaudRate> {
    Some(match n {
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        _ => return None,
    })
}

/// Inverse of [`standard_baud_rate`]: maps a `nix` `BaudRate` enum value
/// back to the plain integer rate, for reading a committed speed back out
/// of a termios block.
fn baud_rate_value(rate: BaudRate) -> u32 {
    match rate {
        BaudRate::B50 => 50,
        BaudRate::B75 => 75,
        BaudRate::B110 => 110,
        BaudRate::B134 => 134,
        BaudRate::B150 => 150,
        BaudRate::B200 => 200,
        BaudRate::B300 => 300,
        BaudRate::B600 => 600,
        BaudRate::B1200 => 1200,
        BaudRate::B1800 => 1800,
        BaudRate::B2400 => 2400,
        BaudRate::B4800 => 4800,
        BaudRate::B9600 => 9600,
        BaudRate::B19200 => 19200,
        BaudRate::B38400 => 38400,
        BaudRate::B57600 => 57600,
        BaudRate::B115200 => 115_200,
        BaudRate::B230400 => 230_400,
        _ => 9600,
    }
}

fn apply_options_to_termios(options: &PortOptions, termios: &mut Termios) {
    use nix::sys::termios::ControlFlags as CF;

    termios.control_flags.remove(CF::CSIZE);
    termios.control_flags.insert(match options.data_bits {
        crate::options::DataBits::Five => CF::CS5,
        crate::options::DataBits::Six => CF::CS6,
        crate::options::DataBits::Seven => CF::CS7,
        crate::options::DataBits::Eight => CF::CS8,
    });

    termios.control_flags.set(
        CF::PARENB,
        !matches!(options.parity, crate::options::Parity::None),
    );
    termios
        .control_flags
        .set(CF::PARODD, matches!(options.parity, crate::options::Parity::Odd));

    termios
        .control_flags
        .set(CF::CSTOPB, matches!(options.stop_bits, crate::options::StopBits::Two));

    let FlowFlags {
        rts_in, cts_out, ..
    } = options.flow;
    termios.control_flags.set(CF::CRTSCTS, rts_in || cts_out);

    termios.control_flags.set(CF::CLOCAL, options.local_mode);
    termios.control_flags.set(CF::HUPCL, options.hangup_on_close);

    termios
        .local_flags
        .set(LocalFlags::ISIG, options.signals_enabled);
    termios
        .local_flags
        .set(LocalFlags::ICANON, options.canonical_mode);
    termios.local_flags.set(LocalFlags::ECHO, options.echo);
    termios
        .local_flags
        .set(LocalFlags::ECHOE, options.echo_erase);

    termios.input_flags.set(
        InputFlags::IXON | InputFlags::IXOFF,
        options.software_flow_control,
    );

    termios.control_chars[SCI::VEOL as usize] = options.control_chars.end_of_line as nix::libc::cc_t;
    termios.control_chars[SCI::VSTART as usize] = options.control_chars.start as nix::libc::cc_t;
    termios.control_chars[SCI::VSTOP as usize] = options.control_chars.stop as nix::libc::cc_t;

    if let Some(baud) = standard_baud_rate(options.baud_rate) {
        let _ = termios::cfsetspeed(termios, baud);
    }
}

fn apply_termios_to_fd(fd: RawFd, options: &PortOptions) -> io::Result<()> {
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let mut termios = termios::tcgetattr(borrowed)?;

    if standard_baud_rate(options.baud_rate).is_none() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {}", options.baud_rate),
        ));
    }

    apply_options_to_termios(options, &mut termios);
    termios::tcsetattr(borrowed, SetArg::TCSANOW, &termios)?;
    Ok(())
}

fn options_from_termios(termios: &Termios) -> PortOptions {
    use nix::sys::termios::ControlFlags as CF;

    let data_bits = if termios.control_flags.contains(CF::CS8) {
        crate::options::DataBits::Eight
    } else if termios.control_flags.contains(CF::CS7) {
        crate::options::DataBits::Seven
    } else if termios.control_flags.contains(CF::CS6) {
        crate::options::DataBits::Six
    } else {
        crate::options::DataBits::Five
    };

    let parity = if !termios.control_flags.contains(CF::PARENB) {
        crate::options::Parity::None
    } else if termios.control_flags.contains(CF::PARODD) {
        crate::options::Parity::Odd
    } else {
        crate::options::Parity::Even
    };

    let stop_bits = if termios.control_flags.contains(CF::CSTOPB) {
        crate::options::StopBits::Two
    } else {
        crate::options::StopBits::One
    };

    let hw_flow = termios.control_flags.contains(CF::CRTSCTS);
    let baud_rate = baud_rate_value(termios::cfgetospeed(termios));

    PortOptions {
        baud_rate,
        data_bits,
        parity,
        stop_bits,
        flow: FlowFlags {
            rts_in: hw_flow,
            dtr_in: false,
            cts_out: hw_flow,
            dsr_out: false,
            car_out: false,
        },
        local_mode: termios.control_flags.contains(CF::CLOCAL),
        hangup_on_close: termios.control_flags.contains(CF::HUPCL),
        signals_enabled: termios.local_flags.contains(LocalFlags::ISIG),
        canonical_mode: termios.local_flags.contains(LocalFlags::ICANON),
        echo: termios.local_flags.contains(LocalFlags::ECHO),
        echo_erase: termios.local_flags.contains(LocalFlags::ECHOE),
        software_flow_control: termios.input_flags.contains(InputFlags::IXON),
        control_chars: crate::options::ControlChars {
            end_of_line: termios.control_chars[SCI::VEOL as usize] as u8,
            start: termios.control_chars[SCI::VSTART as usize] as u8,
            stop: termios.control_chars[SCI::VSTOP as usize] as u8,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_token_identity() {
        let a = OwnerToken::new();
        let b = OwnerToken::new();
        let a_clone = a.clone();
        assert_ne!(a, b);
        assert_eq!(a, a_clone);
    }

    #[test]
    fn claim_release_is_exclusive() {
        let port = Port::new("/dev/cu.fake", "fake", PortKind::RS232, BTreeMap::new());
        let t1 = OwnerToken::new();
        let t2 = OwnerToken::new();
        assert!(port.try_claim(t1.clone()));
        assert!(!port.try_claim(t2));
        assert_eq!(port.owner(), Some(t1));
    }

    #[test]
    fn release_on_unclaimed_port_is_a_no_op() {
        let port = Port::new("/dev/cu.fake", "fake", PortKind::RS232, BTreeMap::new());
        port.release();
        assert!(port.is_available());
    }

    #[test]
    fn close_is_idempotent_when_never_opened() {
        let port = Port::new("/dev/cu.fake", "fake", PortKind::RS232, BTreeMap::new());
        port.close();
        port.close();
        assert!(!port.is_open());
    }

    #[test]
    fn standard_baud_rate_accepts_known_rates_only() {
        assert!(standard_baud_rate(9600).is_some());
        assert!(standard_baud_rate(115_200).is_some());
        assert!(standard_baud_rate(123_456).is_none());
    }
}
