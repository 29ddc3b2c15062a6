//! Application-wide constants and compile-time configuration.
//!
//! All pool sizes, buffer capacities, timing parameters, and protocol
//! constants live here so they can be tuned in one place.

// BLE link pool

/// Number of connection slots, i.e. how many HID peripherals can be
/// bridged at the same time. Also sizes the SoftDevice central link
/// count and the bonded-peer store.
pub const MAX_PERIPHERALS: usize = 4;

/// Maximum notification subscriptions tracked per connection slot.
/// A composite HID peripheral typically exposes 3-6 report
/// characteristics; 10 leaves headroom for vendor extras.
pub const MAX_SUBSCRIPTIONS: usize = 10;

/// Capacity of the per-slot handle maps. Must be a power of two
/// (heapless index-map requirement) and at least `MAX_SUBSCRIPTIONS`.
pub const HANDLE_MAP_CAPACITY: usize = 16;

/// BLE connection interval range (in 1.25 ms units).
/// 6 = 7.5 ms (lowest latency for HID).
pub const BLE_CONN_INTERVAL_MIN: u16 = 6;
pub const BLE_CONN_INTERVAL_MAX: u16 = 12;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 50 = 500 ms, so a
/// vanished peripheral frees its slot quickly.
pub const BLE_SUP_TIMEOUT: u16 = 50;

/// How long a whitelist connect may hunt for a matched peripheral
/// before the attempt is abandoned and scanning resumes (seconds).
pub const BLE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// ATT MTU requested on every central link. A single read response
/// carries MTU - 1 bytes, which bounds how much of a Report Map one
/// read can deliver.
pub const BLE_ATT_MTU: u16 = 247;

/// Peripheral names claimed at boot when no bonded peers are stored.
pub const DEFAULT_TARGET_NAMES: &[&str] = &["Brydge C-Touch", "Mouse", "Keyboard"];

// HID report plumbing

/// Largest framed input report forwarded to USB (bytes). Matches the
/// negotiated ATT MTU, so a maximal GATT notification plus its report
/// ID prefix still fits after truncation.
pub const MAX_FRAME_LEN: usize = 247;

/// Capacity of a report map (HID report descriptor) read from a
/// peripheral. Composite keyboard/touchpad maps run 300-600 bytes;
/// 768 covers everything seen in the wild.
pub const REPORT_MAP_CAPACITY: usize = 768;

/// Maximum descriptor segments in one composite descriptor.
pub const MAX_SEGMENTS: usize = 16;

// USB

/// Number of USB HID device units exposed to the host. Each bridged
/// peripheral gets its own unit.
pub const MAX_HID_UNITS: usize = 4;

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0002;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "hogbridge";
pub const USB_PRODUCT: &str = "HID-over-GATT to USB Bridge";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// USB HID polling interval (ms). 1 ms = 1000 Hz for lowest latency.
pub const USB_HID_POLL_MS: u8 = 1;

/// USB HID endpoint max packet size (bytes).
pub const USB_HID_PACKET_SIZE: u16 = 64;

// Bonded-peer storage

/// Flash page index where the bond store starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for the bond store.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;
