//! hogbridge - BLE HID-over-GATT peripherals republished as USB HID
//! devices.
//!
//! The crate splits along the hardware boundary:
//!
//! - **Core** (always compiled, host-testable): the peripheral bridge
//!   ([`bridge`]) with its slot pool, discovery orchestration, report
//!   map accumulation and notification framing; descriptor parsing and
//!   composite assembly ([`hid`]); and the HID unit pool with the USB
//!   re-enumeration sequence ([`usb::units`]). All of it is
//!   synchronous, `no_std`, and free of I/O - events go in, commands
//!   and frames come out.
//! - **Embedded boundary** (feature `embedded`): Embassy tasks that
//!   drive the SoftDevice S140 central role and the nRF52840 USB
//!   controller, translating between the async world and the core's
//!   event methods.
//!
//! Host-side: `cargo test`. On target: build the binary with
//! `--features embedded`.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod bridge;
pub mod config;
pub mod error;
pub mod hid;
pub mod usb;

#[cfg(feature = "embedded")]
pub mod bond_store;

pub use ble::{DiscoveredCharacteristic, PeerAddress};
pub use bridge::{PeripheralBridge, SlotSink};
pub use hid::{CompositeDescriptor, ReportClass, TouchpadFeature};
pub use usb::units::HidUnitSet;
pub use usb::UsbHidPort;
