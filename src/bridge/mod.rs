//! Peripheral bridge: a fixed pool of BLE connection slots, each
//! running an independent discovery/subscription/report-routing state
//! machine.
//!
//! The bridge is deliberately synchronous and I/O-free. The embedded
//! tasks own the async boundary: they feed connection, discovery, and
//! notification events in through the methods on
//! [`PeripheralBridge`], execute whatever GATT operations those
//! methods hand back, and forward the bridge's output (report maps,
//! framed input reports) to the USB side through a [`SlotSink`]. That
//! split keeps every state transition testable on the host.
//!
//! Slots are addressed by the platform's per-connection numeric index.
//! BLE events arrive serialized on one executor, so bridge methods
//! never lock against each other; the caller wraps the bridge in
//! whatever mutex its task layout requires.

pub mod orchestrator;
pub mod report_map;
pub mod router;
pub mod slot;

pub use orchestrator::{
    DiscoveryOutcome, GattOp, MapProgress, MapReadRequest, SecurityVerdict,
};
pub use slot::{PeripheralSlot, ScanTarget, SlotState};

use heapless::String;

use crate::ble::PeerAddress;
use crate::config::MAX_PERIPHERALS;
use crate::error::{ClaimError, TargetError};

/// Where a slot's output goes: the complete report map once the
/// deferred read finishes, then every framed input report. The
/// embedded realization forwards both to a USB HID device unit.
pub trait SlotSink {
    fn on_report_map(&mut self, slot: usize, map: &[u8]);
    fn on_input_report(&mut self, slot: usize, frame: &[u8]);
}

/// The slot pool plus registered per-slot sinks.
pub struct PeripheralBridge<S: SlotSink> {
    slots: [PeripheralSlot; MAX_PERIPHERALS],
    sinks: [Option<S>; MAX_PERIPHERALS],
}

impl<S: SlotSink> PeripheralBridge<S> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| PeripheralSlot::new()),
            sinks: core::array::from_fn(|_| None),
        }
    }

    /// Install the sink for a slot, replacing any previous one.
    pub fn register_sink(&mut self, slot: usize, sink: S) -> Result<(), TargetError> {
        let entry = self
            .sinks
            .get_mut(slot)
            .ok_or(TargetError::IndexOutOfRange)?;
        *entry = Some(sink);
        Ok(())
    }

    /// Claim a free slot for a peripheral with a known address.
    pub fn set_scan_target_addr(&mut self, addr: PeerAddress) -> Result<usize, ClaimError> {
        self.claim(ScanTarget::Address(addr))
    }

    /// Claim a free slot for a peripheral advertising the given name.
    /// Names longer than 32 bytes are truncated, mirroring the
    /// truncation the advertisement parser applies.
    pub fn set_scan_target_name(&mut self, name: &str) -> Result<usize, ClaimError> {
        let mut owned: String<32> = String::new();
        for ch in name.chars() {
            if owned.push(ch).is_err() {
                break;
            }
        }
        self.claim(ScanTarget::Name(owned))
    }

    fn claim(&mut self, target: ScanTarget) -> Result<usize, ClaimError> {
        let duplicate = self.slots.iter().any(|s| {
            s.is_occupied()
                && match &target {
                    ScanTarget::Address(a) => s.target.matches_addr(a),
                    ScanTarget::Name(n) => s.target.matches_name(n.as_str()),
                    ScanTarget::None => false,
                }
        });
        if duplicate {
            return Err(ClaimError::DuplicateTarget);
        }
        let slot = self
            .slots
            .iter()
            .position(|s| !s.is_occupied())
            .ok_or(ClaimError::PoolExhausted)?;
        self.slots[slot].target = target;
        self.slots[slot].state = SlotState::Claimed;
        Ok(slot)
    }

    /// Drop the claim tracking the given address. The caller owns
    /// tearing down any live link first.
    pub fn remove_scan_target_addr(&mut self, addr: &PeerAddress) -> Result<usize, TargetError> {
        self.remove_where(|s| s.target.matches_addr(addr))
    }

    /// Drop the claim tracking the given name.
    pub fn remove_scan_target_name(&mut self, name: &str) -> Result<usize, TargetError> {
        self.remove_where(|s| s.target.matches_name(name))
    }

    fn remove_where(
        &mut self,
        pred: impl Fn(&PeripheralSlot) -> bool,
    ) -> Result<usize, TargetError> {
        match self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_occupied() && pred(s))
        {
            Some((i, s)) => {
                s.reset();
                Ok(i)
            }
            None => Err(TargetError::UnknownTarget),
        }
    }

    /// Reset a slot unconditionally. Out-of-range is a caller error.
    pub fn release(&mut self, slot: usize) -> Result<(), TargetError> {
        self.slots
            .get_mut(slot)
            .ok_or(TargetError::IndexOutOfRange)?
            .reset();
        Ok(())
    }

    /// Match an advertisement against the claimed slots. Only slots
    /// still waiting in `Claimed` participate, so a peripheral that is
    /// already connecting cannot be matched twice.
    pub fn match_adv(&self, addr: &PeerAddress, name: Option<&str>) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.state == SlotState::Claimed
                && (s.target.matches_addr(addr)
                    || name.is_some_and(|n| s.target.matches_name(n)))
        })
    }

    /// Connection for `slot` dropped: reset it and hand back the peer
    /// address whose bond the caller must forget. `None` when the
    /// event is stale or no peer was ever recorded.
    pub fn on_disconnected(&mut self, slot: usize) -> Option<PeerAddress> {
        let s = self.slots.get_mut(slot)?;
        if !s.is_occupied() {
            return None;
        }
        let peer = s.peer;
        s.reset();
        peer
    }

    /// Whether any slot is waiting for an advertisement match.
    pub fn has_claimed(&self) -> bool {
        self.slots.iter().any(|s| s.state == SlotState::Claimed)
    }

    pub fn slot(&self, slot: usize) -> Option<&PeripheralSlot> {
        self.slots.get(slot)
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub(super) fn slot_mut(&mut self, slot: usize) -> Option<&mut PeripheralSlot> {
        self.slots.get_mut(slot)
    }
}

impl<S: SlotSink> Default for PeripheralBridge<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;
    impl SlotSink for NullSink {
        fn on_report_map(&mut self, _slot: usize, _map: &[u8]) {}
        fn on_input_report(&mut self, _slot: usize, _frame: &[u8]) {}
    }

    fn addr(last: u8) -> PeerAddress {
        PeerAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
    }

    #[test]
    fn claims_fill_slots_in_order() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        assert_eq!(bridge.set_scan_target_addr(addr(1)), Ok(0));
        assert_eq!(bridge.set_scan_target_name("Mouse"), Ok(1));
        assert_eq!(bridge.slot_state(0), Some(SlotState::Claimed));
        assert_eq!(bridge.slot_state(1), Some(SlotState::Claimed));
        assert_eq!(bridge.slot_state(2), Some(SlotState::Free));
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        bridge.set_scan_target_addr(addr(1)).unwrap();
        assert_eq!(
            bridge.set_scan_target_addr(addr(1)),
            Err(ClaimError::DuplicateTarget)
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        bridge.set_scan_target_name("Keyboard").unwrap();
        assert_eq!(
            bridge.set_scan_target_name("Keyboard"),
            Err(ClaimError::DuplicateTarget)
        );
    }

    #[test]
    fn full_pool_is_reported_distinctly() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        for i in 0..MAX_PERIPHERALS {
            bridge.set_scan_target_addr(addr(i as u8)).unwrap();
        }
        assert_eq!(
            bridge.set_scan_target_addr(addr(0xEE)),
            Err(ClaimError::PoolExhausted)
        );
    }

    #[test]
    fn release_frees_the_slot_for_reclaim() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        let slot = bridge.set_scan_target_addr(addr(1)).unwrap();
        bridge.release(slot).unwrap();
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Free));
        // Same address can be claimed again now.
        assert_eq!(bridge.set_scan_target_addr(addr(1)), Ok(slot));
    }

    #[test]
    fn release_out_of_range_is_an_error() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        assert_eq!(
            bridge.release(MAX_PERIPHERALS),
            Err(TargetError::IndexOutOfRange)
        );
    }

    #[test]
    fn remove_by_name_resets_the_matching_slot() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        bridge.set_scan_target_addr(addr(1)).unwrap();
        let slot = bridge.set_scan_target_name("Pad").unwrap();
        assert_eq!(bridge.remove_scan_target_name("Pad"), Ok(slot));
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Free));
        assert_eq!(
            bridge.remove_scan_target_name("Pad"),
            Err(TargetError::UnknownTarget)
        );
    }

    #[test]
    fn no_two_occupied_slots_share_an_address() {
        // Exercise an arbitrary claim/release interleaving and check
        // the pool invariant after every step.
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        let steps: &[(bool, u8)] = &[
            (true, 1),
            (true, 2),
            (false, 1),
            (true, 2), // duplicate, rejected
            (true, 3),
            (true, 1),
            (false, 2),
            (true, 2),
        ];
        for &(is_claim, a) in steps {
            if is_claim {
                let _ = bridge.set_scan_target_addr(addr(a));
            } else {
                let _ = bridge.remove_scan_target_addr(&addr(a));
            }
            for i in 0..MAX_PERIPHERALS {
                for j in (i + 1)..MAX_PERIPHERALS {
                    let (si, sj) = (bridge.slot(i).unwrap(), bridge.slot(j).unwrap());
                    if si.is_occupied() && sj.is_occupied() {
                        assert_ne!(si.target(), sj.target());
                    }
                }
            }
        }
    }

    #[test]
    fn match_adv_only_considers_waiting_claims() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        let slot = bridge.set_scan_target_name("Mouse").unwrap();
        assert_eq!(bridge.match_adv(&addr(9), Some("Mouse")), Some(slot));
        // Once the slot starts connecting, the same advertisement no
        // longer matches.
        assert!(bridge.on_connected(slot, addr(9), 0));
        assert_eq!(bridge.match_adv(&addr(9), Some("Mouse")), None);
    }

    #[test]
    fn disconnect_returns_peer_and_frees_slot() {
        let mut bridge: PeripheralBridge<NullSink> = PeripheralBridge::new();
        let slot = bridge.set_scan_target_name("Mouse").unwrap();
        assert!(bridge.on_connected(slot, addr(7), 100));
        assert_eq!(bridge.on_disconnected(slot), Some(addr(7)));
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Free));
        // Stale follow-up is a no-op.
        assert_eq!(bridge.on_disconnected(slot), None);
    }
}
