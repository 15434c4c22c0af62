#![cfg(target_os = "linux")]

mod pty_fixture;

use nix::fcntl::OFlag;
use pty_fixture::open_pty_pair;
use rstest::rstest;
use rstest_reuse::{self, apply, template};
use serial_station::options::{keys, OptionValue, OptionsMapping};

#[template]
#[rstest]
#[case(9_600)]
#[case(57_600)]
#[case(115_200)]
#[case(921_600)]
fn standard_baud_rates(#[case] baud: u32) {}

#[template]
#[rstest]
#[case(1_000)]
#[case(42_000)]
#[case(1_234_000)]
fn non_standard_baud_rates(#[case] baud: u32) {}

fn set_baud(port: &serial_station::Port, baud: u32) -> bool {
    let mapping = OptionsMapping::new()
        .with(keys::SERVICE_NAME, OptionValue::Text(port.service_name().to_owned()))
        .with(keys::SPEED, OptionValue::UInt(baud));
    port.set_options(&mapping).is_ok()
}

#[apply(standard_baud_rates)]
#[cfg_attr(feature = "ignore-hardware-tests", ignore)]
fn standard_baud_rate_commits(#[case] baud: u32) {
    let (port, _master) = open_pty_pair();
    port.open(OFlag::O_RDWR).unwrap();
    assert!(set_baud(&port, baud), "expected {baud} to commit");
    assert_eq!(port.options().unwrap().get(keys::SPEED), Some(&OptionValue::UInt(baud)));
}

#[apply(non_standard_baud_rates)]
#[cfg_attr(feature = "ignore-hardware-tests", ignore)]
fn non_standard_baud_rate_fails_to_commit(#[case] baud: u32) {
    let (port, _master) = open_pty_pair();
    port.open(OFlag::O_RDWR).unwrap();
    assert!(!set_baud(&port, baud), "expected {baud} to be rejected");
}
