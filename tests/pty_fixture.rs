//! Shared PTY fixture for integration tests: a real device-backed `Port`
//! without needing physical hardware, opening one side of a pseudo
//! terminal pair and exercising it through the public API.

#![cfg(target_os = "linux")]

use std::collections::BTreeMap;

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};

use serial_station::{Port, PortKind};

/// Opens a fresh pty pair and wraps the slave side in a `Port`, keeping the
/// master fd alive for the test to drive the other end.
pub fn open_pty_pair() -> (Port, PtyMaster) {
    let _ = env_logger::builder().is_test(true).try_init();

    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).expect("posix_openpt");
    grantpt(&master).expect("grantpt");
    unlockpt(&master).expect("unlockpt");
    let slave_path = ptsname_r(&master).expect("ptsname_r");

    let port = Port::new(slave_path, "pty-slave", PortKind::RS232, BTreeMap::new());
    (port, master)
}
