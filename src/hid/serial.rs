//! Boot-time placeholder descriptor for idle HID device units.
//!
//! The USB composite device's interface set is fixed at enable time,
//! so every unit must register *some* descriptor before the device
//! attaches - long before any BLE peripheral has delivered its report
//! map. Idle units therefore present a vendor-defined serial channel:
//! inert from the host's point of view, but a valid HID interface
//! that keeps the configuration stable until a real report map
//! replaces it.

/// Report ID used by the placeholder serial channel.
pub const CUSTOM_SERIAL_REPORT_ID: u8 = 0x0C;

/// Payload bytes per serial report (64-byte packet minus report ID).
pub const CUSTOM_SERIAL_PAYLOAD_LEN: u8 = 63;

/// Vendor-defined HID report descriptor: one input and one output
/// report of 63 opaque bytes each, both under report ID 0x0C.
pub const CUSTOM_SERIAL_DESCRIPTOR: &[u8] = &[
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x01, // Usage (0x01)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x0C, //   Report ID (12)
    //
    //   - Device-to-host channel -
    0x09, 0x02, //   Usage (0x02)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x3F, //   Report Count (63)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    //   - Host-to-device channel -
    0x09, 0x03, //   Usage (0x03)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    //
    0xC0, // End Collection
];
