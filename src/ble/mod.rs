//! Bluetooth Low Energy subsystem.
//!
//! The platform-neutral part of this module defines the vocabulary the
//! bridge core speaks: peer addresses, HOGP UUIDs, and the shape of a
//! characteristic handed over by service discovery. The embedded
//! submodules drive the Nordic SoftDevice S140 in **Central** role:
//!
//! 1. **Central** - scans for claimed peripherals, connects with a
//!    whitelist, and raises the link to security level 2 (pairing with
//!    bonding, no MITM).
//! 2. **HOGP client** - performs GATT discovery of the HID service
//!    (0x1812), executes the subscribe/read operations the bridge core
//!    requests, and pumps notifications back into it.

pub mod adv_parser;
#[cfg(feature = "embedded")]
pub mod central;
#[cfg(feature = "embedded")]
pub mod hogp_client;

// HID-over-GATT profile UUIDs (16-bit, Bluetooth SIG assigned).

/// HID service.
pub const HID_SERVICE_UUID: u16 = 0x1812;
/// Report Map characteristic (the HID report descriptor).
pub const REPORT_MAP_UUID: u16 = 0x2a4b;
/// Report characteristic (input/output/feature report data).
pub const HID_REPORT_UUID: u16 = 0x2a4d;
/// Report Reference descriptor ([report ID, report type]).
pub const REPORT_REF_UUID: u16 = 0x2908;
/// Client Characteristic Configuration descriptor.
pub const CCC_UUID: u16 = 0x2902;

/// Six-byte BLE device address, most-significant byte last (the order
/// the radio and the SoftDevice use). Address type is not part of the
/// identity here: two peers differing only in type are treated as the
/// same device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; 6]);

impl PeerAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

/// One characteristic of the HID service as reported by discovery,
/// with the descriptor handles already resolved. Handles that were not
/// present are zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredCharacteristic {
    /// 16-bit characteristic UUID, or 0 for vendor/128-bit UUIDs.
    pub uuid16: u16,
    /// Value handle.
    pub value_handle: u16,
    /// Client Characteristic Configuration descriptor handle (0 if absent).
    pub ccc_handle: u16,
    /// Report Reference descriptor handle (0 if absent).
    pub report_ref_handle: u16,
    /// Whether the characteristic supports notifications.
    pub notify: bool,
}
