//! Per-connection slot state.
//!
//! Everything one bridged peripheral needs lives in its slot: the scan
//! target that claimed it, the connection lifecycle state, the
//! notification subscriptions, the handle maps built during discovery,
//! and the report-map reassembly buffer. Slots are owned by the
//! [`PeripheralBridge`](super::PeripheralBridge) and addressed by the
//! platform's per-connection index.

use heapless::{FnvIndexMap, String, Vec};

use crate::ble::PeerAddress;
use crate::bridge::report_map::ReportMapBuffer;
use crate::config::{HANDLE_MAP_CAPACITY, MAX_SUBSCRIPTIONS};

/// Lifecycle of a connection slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotState {
    /// Unclaimed and empty.
    #[default]
    Free,
    /// Claimed for a scan target; waiting for an advertisement match.
    Claimed,
    /// Link is up; pairing/encryption request in flight.
    Securing,
    /// GATT discovery of the HID service is running.
    Discovering,
    /// HID service characteristics all processed; waiting for the
    /// end-of-services signal.
    AwaitingServiceEnd,
    /// Deferred Report Map read in progress.
    MapReading,
    /// Subscribed and routing notifications.
    Active,
}

/// What a claimed slot is waiting to see in advertisements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScanTarget {
    #[default]
    None,
    Address(PeerAddress),
    Name(String<32>),
}

impl ScanTarget {
    pub fn matches_addr(&self, addr: &PeerAddress) -> bool {
        matches!(self, ScanTarget::Address(a) if a == addr)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        matches!(self, ScanTarget::Name(n) if n.as_str() == name)
    }
}

/// One notification subscription: the characteristic's value handle
/// plus the CCC descriptor the subscribe was written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subscription {
    pub value_handle: u16,
    pub ccc_handle: u16,
}

/// Per-slot lookup tables built during discovery: report-reference
/// descriptor handle to its owning characteristic's value handle, and
/// value handle to the numeric report ID read from that descriptor.
#[derive(Debug, Default)]
pub struct HandleMaps {
    ref_to_char: FnvIndexMap<u16, u16, HANDLE_MAP_CAPACITY>,
    char_to_report_id: FnvIndexMap<u16, u8, HANDLE_MAP_CAPACITY>,
}

impl HandleMaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember which characteristic owns a report-reference
    /// descriptor handle. Returns false when the table is full.
    pub fn insert_report_ref(&mut self, ref_handle: u16, char_handle: u16) -> bool {
        self.ref_to_char.insert(ref_handle, char_handle).is_ok()
    }

    pub fn char_for_ref(&self, ref_handle: u16) -> Option<u16> {
        self.ref_to_char.get(&ref_handle).copied()
    }

    /// Record the report ID read from a characteristic's
    /// report-reference descriptor. Returns false when full.
    pub fn set_report_id(&mut self, char_handle: u16, report_id: u8) -> bool {
        self.char_to_report_id.insert(char_handle, report_id).is_ok()
    }

    pub fn report_id_for(&self, char_handle: u16) -> Option<u8> {
        self.char_to_report_id.get(&char_handle).copied()
    }

    pub fn clear(&mut self) {
        self.ref_to_char.clear();
        self.char_to_report_id.clear();
    }
}

/// State for one bridged peripheral.
#[derive(Debug)]
pub struct PeripheralSlot {
    pub(super) state: SlotState,
    pub(super) target: ScanTarget,
    /// Address of the connected peer (may differ from the target for
    /// name claims).
    pub(super) peer: Option<PeerAddress>,
    /// Uptime when the link came up, for link-setup timing.
    pub(super) link_open_ms: u64,
    pub(super) subscriptions: Vec<Subscription, MAX_SUBSCRIPTIONS>,
    /// Cached value handle for the deferred Report Map read (0 = the
    /// service exposed no Report Map characteristic).
    pub(super) map_read_handle: u16,
    pub(super) map: ReportMapBuffer,
    pub(super) handles: HandleMaps,
}

impl PeripheralSlot {
    pub fn new() -> Self {
        Self {
            state: SlotState::Free,
            target: ScanTarget::None,
            peer: None,
            link_open_ms: 0,
            subscriptions: Vec::new(),
            map_read_handle: 0,
            map: ReportMapBuffer::new(),
            handles: HandleMaps::new(),
        }
    }

    /// Return the slot to `Free`, dropping all per-connection state.
    /// Idempotent: resetting twice is the same as once.
    pub fn reset(&mut self) {
        self.state = SlotState::Free;
        self.target = ScanTarget::None;
        self.peer = None;
        self.link_open_ms = 0;
        self.subscriptions.clear();
        self.map_read_handle = 0;
        self.map.reset();
        self.handles.clear();
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn is_occupied(&self) -> bool {
        self.state != SlotState::Free
    }

    /// Subscriptions are in place from the end-of-services signal
    /// onwards; notifications are routed from then on.
    pub fn is_subscribed(&self) -> bool {
        matches!(self.state, SlotState::MapReading | SlotState::Active)
    }

    pub fn peer(&self) -> Option<PeerAddress> {
        self.peer
    }

    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }
}

impl Default for PeripheralSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_is_idempotent() {
        let mut slot = PeripheralSlot::new();
        slot.state = SlotState::Active;
        slot.peer = Some(PeerAddress::new([1, 2, 3, 4, 5, 6]));
        slot.map.on_chunk(&[1, 2, 3]);
        slot.handles.insert_report_ref(0x20, 0x1E);

        slot.reset();
        let first = (slot.state(), slot.peer(), slot.map.len());
        slot.reset();
        let second = (slot.state(), slot.peer(), slot.map.len());

        assert_eq!(first, second);
        assert_eq!(slot.state(), SlotState::Free);
        assert!(!slot.is_occupied());
        assert!(slot.handles.char_for_ref(0x20).is_none());
    }

    #[test]
    fn subscribed_covers_map_reading_and_active() {
        let mut slot = PeripheralSlot::new();
        for state in [
            SlotState::Free,
            SlotState::Claimed,
            SlotState::Securing,
            SlotState::Discovering,
            SlotState::AwaitingServiceEnd,
        ] {
            slot.state = state;
            assert!(!slot.is_subscribed());
        }
        slot.state = SlotState::MapReading;
        assert!(slot.is_subscribed());
        slot.state = SlotState::Active;
        assert!(slot.is_subscribed());
    }

    #[test]
    fn handle_maps_resolve_both_directions() {
        let mut maps = HandleMaps::new();
        assert!(maps.insert_report_ref(0x21, 0x1F));
        assert_eq!(maps.char_for_ref(0x21), Some(0x1F));
        assert!(maps.set_report_id(0x1F, 2));
        assert_eq!(maps.report_id_for(0x1F), Some(2));
        assert!(maps.report_id_for(0x99).is_none());
    }

    #[test]
    fn scan_target_matching() {
        let addr = PeerAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let by_addr = ScanTarget::Address(addr);
        assert!(by_addr.matches_addr(&addr));
        assert!(!by_addr.matches_addr(&PeerAddress::default()));
        assert!(!by_addr.matches_name("Mouse"));

        let mut name = String::new();
        let _ = name.push_str("Mouse");
        let by_name = ScanTarget::Name(name);
        assert!(by_name.matches_name("Mouse"));
        assert!(!by_name.matches_name("mouse"));
        assert!(!by_name.matches_addr(&addr));
    }
}
