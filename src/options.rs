//! The termios-style options block and its translation to/from the keyed
//! external mapping form.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Number of data bits per character.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataBits {
    /// 5 bits per character.
    Five,
    /// 6 bits per character.
    Six,
    /// 7 bits per character.
    Seven,
    /// 8 bits per character.
    Eight,
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n: u8 = (*self).into();
        write!(f, "{n}")
    }
}

impl From<DataBits> for u8 {
    fn from(value: DataBits) -> Self {
        match value {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            _ => Err(()),
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Parity::None => write!(f, "None"),
            Parity::Odd => write!(f, "Odd"),
            Parity::Even => write!(f, "Even"),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StopBits::One => write!(f, "One"),
            StopBits::Two => write!(f, "Two"),
        }
    }
}

/// Hardware flow-control pin state, independently settable: the underlying
/// device exposes each signal separately rather than as a single combined
/// flow-control mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowFlags {
    /// RTS input flow control.
    pub rts_in: bool,
    /// DTR input flow control.
    pub dtr_in: bool,
    /// CTS output flow control.
    pub cts_out: bool,
    /// DSR output flow control.
    pub dsr_out: bool,
    /// CAR (carrier detect) output flow control.
    pub car_out: bool,
}

/// The three control characters recognized by the options mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlChars {
    /// Line-termination character.
    pub end_of_line: u8,
    /// XON (start) character. Default DC1 / `0x11`.
    pub start: u8,
    /// XOFF (stop) character. Default DC3 / `0x13`.
    pub stop: u8,
}

impl Default for ControlChars {
    fn default() -> Self {
        ControlChars {
            end_of_line: 0,
            start: 0x11,
            stop: 0x13,
        }
    }
}

/// A structured view of the line discipline.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortOptions {
    /// Baud rate in symbols-per-second. Always positive.
    pub baud_rate: u32,
    /// Number of bits per character.
    pub data_bits: DataBits,
    /// Parity checking mode.
    pub parity: Parity,
    /// Number of stop bits.
    pub stop_bits: StopBits,
    /// Hardware flow-control pin state.
    pub flow: FlowFlags,
    /// Ignore modem status lines (local mode).
    pub local_mode: bool,
    /// Hang up the line when the port is closed.
    pub hangup_on_close: bool,
    /// ISIG: generate signals on INTR/QUIT/SUSP characters.
    pub signals_enabled: bool,
    /// ICANON: line-buffered input with erase/kill processing.
    pub canonical_mode: bool,
    /// ECHO: echo input characters.
    pub echo: bool,
    /// ECHOE: echo erase character as BS-SP-BS.
    pub echo_erase: bool,
    /// Software (XON/XOFF) flow control.
    pub software_flow_control: bool,
    /// Control characters (EOL, XON, XOFF).
    pub control_chars: ControlChars,
}

impl Default for PortOptions {
    fn default() -> Self {
        PortOptions {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow: FlowFlags::default(),
            local_mode: false,
            hangup_on_close: false,
            signals_enabled: false,
            canonical_mode: false,
            echo: false,
            echo_erase: false,
            software_flow_control: false,
            control_chars: ControlChars::default(),
        }
    }
}

impl PortOptions {
    /// Returns whether remote-echo (the composite of canonical mode, echo,
    /// and echo-erase) is currently enabled.
    #[must_use]
    pub fn remote_echo_enabled(&self) -> bool {
        self.canonical_mode && self.echo && self.echo_erase
    }

    /// Sets or clears remote-echo.
    ///
    /// Enabling sets `{canonical_mode, echo, echo_erase}`. Disabling also
    /// clears `signals_enabled`, matching the original's documented
    /// asymmetry: turning remote echo off is meant to leave the line in a
    /// raw, signal-free state.
    pub fn set_remote_echo_enabled(&mut self, enabled: bool) {
        if enabled {
            self.canonical_mode = true;
            self.echo = true;
            self.echo_erase = true;
        } else {
            self.canonical_mode = false;
            self.echo = false;
            self.echo_erase = false;
            self.signals_enabled = false;
        }
    }
}

/// A single named flow-control signal, as carried inside the flag-set value
/// of the `InputFlowControl`/`OutputFlowControl` mapping keys (spec.md §6:
/// `InputFlowControl` carries a set drawn from `{RTS,DTR}`, `OutputFlowControl`
/// a set drawn from `{CTS,DSR,CAR}`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowFlag {
    /// RTS input flow control.
    Rts,
    /// DTR input flow control.
    Dtr,
    /// CTS output flow control.
    Cts,
    /// DSR output flow control.
    Dsr,
    /// CAR (carrier detect) output flow control.
    Car,
}

/// A value inside an [`OptionsMapping`]. Closed set matching the
/// recognized-key value types.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptionValue {
    /// A string value (used for `ServiceName`).
    Text(String),
    /// An unsigned integer value (`Speed`, `DataBits`).
    UInt(u32),
    /// A boolean flag.
    Bool(bool),
    /// A single byte (control characters).
    Byte(u8),
    /// Parity mode.
    Parity(Parity),
    /// Stop bits.
    StopBits(StopBits),
    /// A flag set (`InputFlowControl`, `OutputFlowControl`).
    Flags(BTreeSet<FlowFlag>),
}

/// The keyed external configuration mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptionsMapping(BTreeMap<String, OptionValue>);

/// Recognized mapping keys.
pub mod keys {
    /// Must equal the port's `service_name`; mismatch rejects the mapping.
    pub const SERVICE_NAME: &str = "ServiceName";
    /// Baud rate.
    pub const SPEED: &str = "Speed";
    /// Data bit width (5..=8).
    pub const DATA_BITS: &str = "DataBits";
    /// Parity mode.
    pub const PARITY: &str = "Parity";
    /// Stop bit count.
    pub const STOP_BITS: &str = "StopBits";
    /// Hardware input flow control: a flag set drawn from `{RTS,DTR}`.
    pub const INPUT_FLOW_CONTROL: &str = "InputFlowControl";
    /// Hardware output flow control: a flag set drawn from `{CTS,DSR,CAR}`.
    pub const OUTPUT_FLOW_CONTROL: &str = "OutputFlowControl";
    /// ISIG.
    pub const SIGNALS: &str = "Signals";
    /// ICANON.
    pub const CANONICAL_MODE: &str = "CanonicalMode";
    /// ECHO.
    pub const ECHO: &str = "Echo";
    /// ECHOE.
    pub const ECHO_ERASE: &str = "EchoErase";
    /// XON/XOFF enable.
    pub const SOFTWARE_FLOW_CONTROL: &str = "SoftwareFlowControl";
    /// Composite remote-echo convenience key.
    pub const REMOTE_ECHO: &str = "RemoteEcho";
    /// Line-termination character.
    pub const END_OF_LINE_CHARACTER: &str = "EndOfLineCharacter";
    /// XON character.
    pub const START_CHARACTER: &str = "StartCharacter";
    /// XOFF character.
    pub const STOP_CHARACTER: &str = "StopCharacter";
}

impl OptionsMapping {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key/value pair, builder-style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Looks up a raw value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    /// Inserts or overwrites a raw value.
    pub fn set(&mut self, key: impl Into<String>, value: OptionValue) {
        self.0.insert(key.into(), value);
    }

    /// Iterates the mapping's entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }
}

/// Which fields changed during a mapping application, used to decide
/// whether a commit is needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedFields {
    /// Whether any recognized key actually changed the block.
    pub any: bool,
}

/// Pure function translating `mapping` onto `current`, applying each
/// recognized key. `ServiceName` must match `service_name`
/// or the whole mapping is rejected. Unknown keys are ignored; absent keys
/// leave the corresponding field unchanged.
///
/// Returns the updated block and whether anything changed.
pub fn apply_mapping(
    service_name: &str,
    current: &PortOptions,
    mapping: &OptionsMapping,
) -> Result<(PortOptions, ChangedFields), MappingError> {
    match mapping.get(keys::SERVICE_NAME) {
        Some(OptionValue::Text(name)) if name == service_name => {}
        Some(_) => return Err(MappingError::ServiceNameMismatch),
        None => return Err(MappingError::MissingServiceName),
    }

    let mut updated = current.clone();
    let mut changed = ChangedFields::default();

    macro_rules! apply_bool {
        ($key:expr, $field:expr) => {
            if let Some(OptionValue::Bool(v)) = mapping.get($key) {
                if *v != $field {
                    $field = *v;
                    changed.any = true;
                }
            }
        };
    }
    macro_rules! apply_byte {
        ($key:expr, $field:expr) => {
            if let Some(OptionValue::Byte(v)) = mapping.get($key) {
                if *v != $field {
                    $field = *v;
                    changed.any = true;
                }
            }
        };
    }

    if let Some(OptionValue::UInt(v)) = mapping.get(keys::SPEED) {
        if *v != updated.baud_rate {
            updated.baud_rate = *v;
            changed.any = true;
        }
    }
    if let Some(OptionValue::UInt(v)) = mapping.get(keys::DATA_BITS) {
        if let Ok(bits) = u8::try_from(*v).and_then(|b| DataBits::try_from(b).map_err(|_| 0u8)) {
            if bits != updated.data_bits {
                updated.data_bits = bits;
                changed.any = true;
            }
        }
    }
    if let Some(OptionValue::Parity(p)) = mapping.get(keys::PARITY) {
        if *p != updated.parity {
            updated.parity = *p;
            changed.any = true;
        }
    }
    if let Some(OptionValue::StopBits(s)) = mapping.get(keys::STOP_BITS) {
        if *s != updated.stop_bits {
            updated.stop_bits = *s;
            changed.any = true;
        }
    }

    if let Some(OptionValue::Flags(flags)) = mapping.get(keys::INPUT_FLOW_CONTROL) {
        let rts_in = flags.contains(&FlowFlag::Rts);
        let dtr_in = flags.contains(&FlowFlag::Dtr);
        if rts_in != updated.flow.rts_in || dtr_in != updated.flow.dtr_in {
            updated.flow.rts_in = rts_in;
            updated.flow.dtr_in = dtr_in;
            changed.any = true;
        }
    }
    if let Some(OptionValue::Flags(flags)) = mapping.get(keys::OUTPUT_FLOW_CONTROL) {
        let cts_out = flags.contains(&FlowFlag::Cts);
        let dsr_out = flags.contains(&FlowFlag::Dsr);
        let car_out = flags.contains(&FlowFlag::Car);
        if cts_out != updated.flow.cts_out
            || dsr_out != updated.flow.dsr_out
            || car_out != updated.flow.car_out
        {
            updated.flow.cts_out = cts_out;
            updated.flow.dsr_out = dsr_out;
            updated.flow.car_out = car_out;
            changed.any = true;
        }
    }
    apply_bool!(keys::SIGNALS, updated.signals_enabled);
    apply_bool!(keys::CANONICAL_MODE, updated.canonical_mode);
    apply_bool!(keys::ECHO, updated.echo);
    apply_bool!(keys::ECHO_ERASE, updated.echo_erase);
    apply_bool!(keys::SOFTWARE_FLOW_CONTROL, updated.software_flow_control);
    apply_byte!(keys::END_OF_LINE_CHARACTER, updated.control_chars.end_of_line);
    apply_byte!(keys::START_CHARACTER, updated.control_chars.start);
    apply_byte!(keys::STOP_CHARACTER, updated.control_chars.stop);

    if let Some(OptionValue::Bool(enabled)) = mapping.get(keys::REMOTE_ECHO) {
        let before = updated.remote_echo_enabled();
        if before != *enabled {
            updated.set_remote_echo_enabled(*enabled);
            changed.any = true;
        }
    }

    Ok((updated, changed))
}

/// Converts a [`PortOptions`] block back into its external mapping form
/// (the inverse of [`apply_mapping`], used by `Port::options()` and by the
/// options round-trip property).
#[must_use]
pub fn to_mapping(service_name: &str, options: &PortOptions) -> OptionsMapping {
    OptionsMapping::new()
        .with(keys::SERVICE_NAME, OptionValue::Text(service_name.to_owned()))
        .with(keys::SPEED, OptionValue::UInt(options.baud_rate))
        .with(
            keys::DATA_BITS,
            OptionValue::UInt(u8::from(options.data_bits) as u32),
        )
        .with(keys::PARITY, OptionValue::Parity(options.parity))
        .with(keys::STOP_BITS, OptionValue::StopBits(options.stop_bits))
        .with(keys::INPUT_FLOW_CONTROL, OptionValue::Flags({
            let mut flags = BTreeSet::new();
            if options.flow.rts_in {
                flags.insert(FlowFlag::Rts);
            }
            if options.flow.dtr_in {
                flags.insert(FlowFlag::Dtr);
            }
            flags
        }))
        .with(keys::OUTPUT_FLOW_CONTROL, OptionValue::Flags({
            let mut flags = BTreeSet::new();
            if options.flow.cts_out {
                flags.insert(FlowFlag::Cts);
            }
            if options.flow.dsr_out {
                flags.insert(FlowFlag::Dsr);
            }
            if options.flow.car_out {
                flags.insert(FlowFlag::Car);
            }
            flags
        }))
        .with(keys::SIGNALS, OptionValue::Bool(options.signals_enabled))
        .with(
            keys::CANONICAL_MODE,
            OptionValue::Bool(options.canonical_mode),
        )
        .with(keys::ECHO, OptionValue::Bool(options.echo))
        .with(keys::ECHO_ERASE, OptionValue::Bool(options.echo_erase))
        .with(
            keys::SOFTWARE_FLOW_CONTROL,
            OptionValue::Bool(options.software_flow_control),
        )
        .with(
            keys::REMOTE_ECHO,
            OptionValue::Bool(options.remote_echo_enabled()),
        )
        .with(
            keys::END_OF_LINE_CHARACTER,
            OptionValue::Byte(options.control_chars.end_of_line),
        )
        .with(
            keys::START_CHARACTER,
            OptionValue::Byte(options.control_chars.start),
        )
        .with(
            keys::STOP_CHARACTER,
            OptionValue::Byte(options.control_chars.stop),
        )
}

/// Errors from applying an [`OptionsMapping`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// `ServiceName` was absent from the mapping.
    #[error("options mapping is missing ServiceName")]
    MissingServiceName,
    /// `ServiceName` did not match the port's own name.
    #[error("ServiceName in options mapping does not match this port")]
    ServiceNameMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_echo_composite_enable_sets_three_flags() {
        let mut opts = PortOptions::default();
        opts.set_remote_echo_enabled(true);
        assert!(opts.canonical_mode);
        assert!(opts.echo);
        assert!(opts.echo_erase);
    }

    #[test]
    fn remote_echo_composite_disable_also_clears_signals() {
        let mut opts = PortOptions::default();
        opts.signals_enabled = true;
        opts.set_remote_echo_enabled(true);
        opts.set_remote_echo_enabled(false);
        assert!(!opts.canonical_mode);
        assert!(!opts.echo);
        assert!(!opts.echo_erase);
        assert!(!opts.signals_enabled);
    }

    #[test]
    fn mapping_rejects_missing_service_name() {
        let current = PortOptions::default();
        let mapping = OptionsMapping::new();
        let err = apply_mapping("cu.usbserial-XYZ", &current, &mapping).unwrap_err();
        assert_eq!(err, MappingError::MissingServiceName);
    }

    #[test]
    fn mapping_rejects_mismatched_service_name() {
        let current = PortOptions::default();
        let mapping = OptionsMapping::new()
            .with(keys::SERVICE_NAME, OptionValue::Text("other".into()));
        let err = apply_mapping("cu.usbserial-XYZ", &current, &mapping).unwrap_err();
        assert_eq!(err, MappingError::ServiceNameMismatch);
    }

    #[test]
    fn mapping_round_trip_preserves_recognized_keys() {
        let mut options = PortOptions::default();
        options.baud_rate = 115_200;
        options.data_bits = DataBits::Seven;
        options.parity = Parity::Even;
        options.stop_bits = StopBits::Two;
        options.flow.rts_in = true;
        options.control_chars.end_of_line = b'\n';

        let mapping = to_mapping("cu.usbserial-XYZ", &options);
        let (round_tripped, changed) =
            apply_mapping("cu.usbserial-XYZ", &PortOptions::default(), &mapping).unwrap();
        assert!(changed.any);
        assert_eq!(round_tripped, options);
    }

    #[quickcheck_macros::quickcheck]
    fn quickcheck_options_round_trip_through_mapping(
        baud_rate: u32,
        data_bits_idx: u8,
        stop_bits_two: bool,
        rts_in: bool,
        cts_out: bool,
        end_of_line: u8,
    ) -> bool {
        let baud_rate = baud_rate.max(1);
        let data_bits = match data_bits_idx % 4 {
            0 => DataBits::Five,
            1 => DataBits::Six,
            2 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = if stop_bits_two { StopBits::Two } else { StopBits::One };

        let mut options = PortOptions {
            baud_rate,
            data_bits,
            stop_bits,
            ..PortOptions::default()
        };
        options.flow.rts_in = rts_in;
        options.flow.cts_out = cts_out;
        options.control_chars.end_of_line = end_of_line;

        let mapping = to_mapping("cu.usbserial-XYZ", &options);
        let (round_tripped, _) =
            match apply_mapping("cu.usbserial-XYZ", &PortOptions::default(), &mapping) {
                Ok(result) => result,
                Err(_) => return false,
            };
        round_tripped == options
    }

    #[quickcheck_macros::quickcheck]
    fn quickcheck_apply_mapping_never_panics_on_unrecognized_keys(
        key: String,
        flag: bool,
    ) -> bool {
        let current = PortOptions::default();
        let mapping = OptionsMapping::new()
            .with(keys::SERVICE_NAME, OptionValue::Text("cu.usbserial-XYZ".into()))
            .with(key, OptionValue::Bool(flag));
        apply_mapping("cu.usbserial-XYZ", &current, &mapping).is_ok()
    }

    #[test]
    fn unknown_keys_are_ignored_and_absent_keys_leave_fields_unchanged() {
        let current = PortOptions::default();
        let mapping = OptionsMapping::new()
            .with(keys::SERVICE_NAME, OptionValue::Text("cu.usbserial-XYZ".into()))
            .with("NotARealKey", OptionValue::Bool(true));
        let (updated, changed) = apply_mapping("cu.usbserial-XYZ", &current, &mapping).unwrap();
        assert!(!changed.any);
        assert_eq!(updated, current);
    }

    #[test]
    fn input_and_output_flow_control_keys_carry_flag_sets() {
        let current = PortOptions::default();
        let mapping = OptionsMapping::new()
            .with(keys::SERVICE_NAME, OptionValue::Text("cu.usbserial-XYZ".into()))
            .with(
                keys::INPUT_FLOW_CONTROL,
                OptionValue::Flags(BTreeSet::from([FlowFlag::Rts])),
            )
            .with(
                keys::OUTPUT_FLOW_CONTROL,
                OptionValue::Flags(BTreeSet::from([FlowFlag::Cts, FlowFlag::Car])),
            );
        let (updated, changed) = apply_mapping("cu.usbserial-XYZ", &current, &mapping).unwrap();
        assert!(changed.any);
        assert!(updated.flow.rts_in);
        assert!(!updated.flow.dtr_in);
        assert!(updated.flow.cts_out);
        assert!(!updated.flow.dsr_out);
        assert!(updated.flow.car_out);

        let round_tripped = to_mapping("cu.usbserial-XYZ", &updated);
        assert_eq!(
            round_tripped.get(keys::INPUT_FLOW_CONTROL),
            Some(&OptionValue::Flags(BTreeSet::from([FlowFlag::Rts])))
        );
        assert_eq!(
            round_tripped.get(keys::OUTPUT_FLOW_CONTROL),
            Some(&OptionValue::Flags(BTreeSet::from([
                FlowFlag::Cts,
                FlowFlag::Car
            ])))
        );
    }
}
