//! USB Device subsystem - presents a composite HID device to the host.
//!
//! The device carries a fixed pool of HID interface units, one per
//! bridgeable BLE peripheral. Each unit starts life with a placeholder
//! vendor descriptor; when a peripheral delivers its report map, the
//! unit's descriptor is replaced and the whole device re-enumerates so
//! the host re-reads every interface (a composite device's interface
//! set is fixed at enable time and cannot be patched one interface at
//! a time).
//!
//! The platform-neutral part - the unit pool and the re-enumeration
//! sequence - lives in [`units`] behind the [`UsbHidPort`] trait. The
//! embedded realization on the nRF52840's USB controller (driven by
//! `embassy-usb`) lives in [`hid_device`].

pub mod units;

#[cfg(feature = "embedded")]
pub mod hid_device;

use crate::error::PortError;

/// Platform surface the re-enumeration sequence drives. On embedded
/// this stages descriptors for the USB task and detaches/attaches the
/// device; in tests it is a mock that records the call order.
pub trait UsbHidPort {
    /// Detach the device from the bus.
    fn disable(&mut self) -> Result<(), PortError>;
    /// Register `descriptor` as the report descriptor of `unit`.
    fn register(&mut self, unit: usize, descriptor: &[u8]) -> Result<(), PortError>;
    /// (Re-)attach the device to the bus, with whatever descriptors
    /// have been registered since the last disable.
    fn enable(&mut self) -> Result<(), PortError>;
}
