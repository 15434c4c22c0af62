//! A library for discovering, owning, configuring, and performing
//! synchronous or backgrounded I/O against serial devices.
//!
//! The crate is organized around one concrete [`Port`] type that owns its
//! whole lifecycle: discovery hands out `Arc<Port>` instances ([`registry`]),
//! callers claim one exclusively ([`Port::try_claim`]), configure it
//! ([`options`]), then either block on it directly (the inherent read/write
//! methods) or hand it a [`Delegate`] and let a worker thread drive it
//! ([`background`]).
//!
//! ```no_run
//! use serial_station::{DeviceRegistry, OwnerToken};
//! use nix::fcntl::OFlag;
//!
//! let registry = DeviceRegistry::shared();
//! let Some(port) = registry.all_ports().into_iter().next() else {
//!     return;
//! };
//!
//! let token = OwnerToken::new();
//! if port.try_claim(token) {
//!     port.open(OFlag::O_RDWR).unwrap();
//!     port.write(b"AT\r\n").unwrap();
//!     let (reply, _end) = port.read_up_to_char(b'\n').unwrap();
//!     println!("{reply:?}");
//!     port.release();
//! }
//! ```

#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![doc(test(attr(allow(unused_must_use))))]

pub mod background;
pub mod error;
pub mod options;
pub mod port;
pub mod registry;
mod sync_io;

pub use background::{Delegate, Dispatcher, InlineDispatcher};
pub use error::{EndCode, PortError, Result};
pub use options::{
    ChangedFields, ControlChars, DataBits, FlowFlag, FlowFlags, MappingError, OptionValue,
    OptionsMapping, Parity, PortOptions, StopBits,
};
pub use port::{OwnerToken, Port, PortKind};
pub use registry::{DeviceRegistry, DiscoveredPort, PortDiscovery, PosixGlobDiscovery, RegistryEvent};
pub use sync_io::INTERNAL_BUFFER_SIZE;
