//! Regression coverage for opening a pseudo terminal: the original library
//! this crate's design is based on shipped a fix for a crash when opening a
//! pty whose baud rate reads back as zero. This exercises the same path
//! through the new API (open, sample options, close) instead of requiring
//! `socat` and a real device file.

#![cfg(target_os = "linux")]

mod pty_fixture;

use nix::fcntl::OFlag;
use pty_fixture::open_pty_pair;

#[test]
#[cfg_attr(feature = "ignore-hardware-tests", ignore)]
fn open_and_close_a_pty_slave_without_error() {
    let (port, _master) = open_pty_pair();
    port.open(OFlag::O_RDWR).unwrap();
    assert!(port.is_open());

    // A freshly opened pty has no meaningful baud rate; sampling options
    // must not panic even though the line has never been configured.
    let _ = port.options().unwrap();

    port.close();
    assert!(!port.is_open());
}
