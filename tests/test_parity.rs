#![cfg(target_os = "linux")]

mod pty_fixture;

use nix::fcntl::OFlag;
use pty_fixture::open_pty_pair;
use rstest::rstest;
use rstest_reuse::{self, apply, template};
use serial_station::options::{keys, OptionValue, OptionsMapping};
use serial_station::Parity;

#[template]
#[rstest]
#[case(Parity::None)]
#[case(Parity::Odd)]
#[case(Parity::Even)]
fn standard_parities(#[case] parity: Parity) {}

#[apply(standard_parities)]
#[cfg_attr(feature = "ignore-hardware-tests", ignore)]
fn parity_round_trips_through_options_mapping(#[case] parity: Parity) {
    let (port, _master) = open_pty_pair();
    port.open(OFlag::O_RDWR).unwrap();

    let mapping = OptionsMapping::new()
        .with(keys::SERVICE_NAME, OptionValue::Text(port.service_name().to_owned()))
        .with(keys::PARITY, OptionValue::Parity(parity));
    port.set_options(&mapping).unwrap();

    assert_eq!(port.options().unwrap().get(keys::PARITY), Some(&OptionValue::Parity(parity)));
}

#[test]
#[cfg_attr(feature = "ignore-hardware-tests", ignore)]
fn end_to_end_write_and_read_over_pty() {
    let (port, master) = open_pty_pair();
    port.open(OFlag::O_RDWR).unwrap();
    port.set_read_timeout(std::time::Duration::from_secs(1)).unwrap();

    nix::unistd::write(&master, b"hello\n").unwrap();
    let (bytes, _end) = port.read_up_to_char(b'\n').unwrap();
    assert_hex::assert_eq_hex!(bytes, b"hello\n".to_vec());
}
