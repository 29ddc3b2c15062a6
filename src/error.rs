//! Error types for hogbridge.
//!
//! We avoid `alloc` - all variants carry only fixed-size data. Each
//! surface (slot pool, descriptor builder, USB port, flash store) has
//! its own small enum so callers can match on exactly the failures
//! that surface can produce. `defmt::Format` is derived behind the
//! `defmt` feature for efficient on-target logging.

/// Claiming a scan target failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClaimError {
    /// An occupied slot already tracks this address or name.
    DuplicateTarget,
    /// Every connection slot is in use.
    PoolExhausted,
}

/// Removing or addressing a scan target failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TargetError {
    /// Slot index past the end of the pool.
    IndexOutOfRange,
    /// No occupied slot tracks the given address or name.
    UnknownTarget,
}

/// Appending a segment to a composite descriptor failed. The
/// descriptor is left unmodified in either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InsertError {
    /// All segment entries are in use.
    SegmentsFull,
    /// Appending would overflow the shared descriptor buffer.
    BufferOverflow,
}

/// A USB platform operation failed. Produced by `UsbHidPort`
/// implementations; the re-enumeration sequence propagates it so the
/// caller can log which phase broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// Detaching the device from the bus failed.
    Disable,
    /// The platform rejected a descriptor registration.
    Register,
    /// Re-attaching the device to the bus failed.
    Enable,
}

/// Publishing a descriptor to a HID device unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// Unit index past the end of the unit pool.
    UnitOutOfRange,
    /// The underlying USB port operation failed.
    Port(PortError),
}

/// BLE link-level failures reported by the connection tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// Connection attempt failed or timed out.
    ConnectFailed,
    /// Pairing/encryption did not reach the required security level.
    SecurityFailed,
    /// GATT service discovery failed.
    DiscoveryFailed,
}

/// Flash bond-store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Flash read/write/erase failed.
    Flash,
}

// Convenience conversions

impl From<PortError> for PublishError {
    fn from(e: PortError) -> Self {
        PublishError::Port(e)
    }
}
