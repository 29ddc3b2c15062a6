//! Per-slot subscription orchestration.
//!
//! Each method here is one event from the BLE boundary; the return
//! value tells the caller what to do against the live link next. The
//! slot walks `Claimed → Securing → Discovering → AwaitingServiceEnd →
//! MapReading → Active`; an event carrying the index of a slot that
//! has since been reset detects the state mismatch and becomes a
//! no-op, so a disconnect racing an in-flight callback can never
//! mutate a freed (or re-claimed) slot.

use heapless::Vec;

use crate::ble::{DiscoveredCharacteristic, PeerAddress, REPORT_MAP_UUID};
use crate::bridge::report_map::ChunkOutcome;
use crate::bridge::router;
use crate::bridge::slot::{SlotState, Subscription};
use crate::bridge::{PeripheralBridge, SlotSink};

/// GATT operations the caller must execute on the live link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattOp {
    /// Write 0x0001 to the CCC descriptor to enable notifications.
    /// Subscriptions are volatile: nothing is persisted, a reconnect
    /// starts over from discovery.
    Subscribe { value_handle: u16, ccc_handle: u16 },
    /// One-shot read of a report-reference descriptor; the result goes
    /// back in through [`PeripheralBridge::on_report_ref_value`].
    ReadReportReference { handle: u16 },
}

/// What to do with the link after a security result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityVerdict {
    /// Link reached the required level: start GATT discovery (and
    /// resume scanning for the next target in parallel).
    StartDiscovery,
    /// Pairing failed; the slot was reset. Drop the link.
    TearDown,
    /// Stale event for a slot not in `Securing`; nothing changed.
    /// Drop the link the event came from.
    Ignored,
}

/// The deferred Report Map read to issue once discovery has ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MapReadRequest {
    pub value_handle: u16,
}

/// Outcome of the end-of-services signal.
#[derive(Debug, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Stale event; nothing changed.
    Ignored,
    /// The slot is subscribed. If the service exposed a Report Map
    /// characteristic, its deferred read must be issued now.
    Ready {
        map_read: Option<MapReadRequest>,
        /// Milliseconds from link-up to subscriptions in place.
        setup_ms: u64,
    },
}

/// Progress of the chunked Report Map read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MapProgress {
    /// Stale event; nothing changed.
    Ignored,
    /// Chunk stored; keep reading.
    More,
    /// Terminator seen; the complete map was delivered to the slot's
    /// sink and the slot is now `Active`.
    Complete { len: usize },
    /// Chunk dropped to protect the buffer; keep reading.
    Overflow,
}

impl<S: SlotSink> PeripheralBridge<S> {
    /// Link to the matched peripheral came up. The caller requests
    /// pairing/encryption immediately after this returns true; a false
    /// return means the slot is no longer waiting (drop the link).
    pub fn on_connected(&mut self, slot: usize, peer: PeerAddress, now_ms: u64) -> bool {
        let Some(s) = self.slot_mut(slot) else {
            return false;
        };
        if s.state != SlotState::Claimed {
            return false;
        }
        s.state = SlotState::Securing;
        s.peer = Some(peer);
        s.link_open_ms = now_ms;
        true
    }

    /// Pairing/encryption finished (or failed). Failure frees the slot
    /// for a new target; partial security is not acceptable for HID
    /// traffic.
    pub fn on_security_result(&mut self, slot: usize, ok: bool) -> SecurityVerdict {
        let Some(s) = self.slot_mut(slot) else {
            return SecurityVerdict::Ignored;
        };
        if s.state != SlotState::Securing {
            return SecurityVerdict::Ignored;
        }
        if ok {
            s.state = SlotState::Discovering;
            SecurityVerdict::StartDiscovery
        } else {
            s.reset();
            SecurityVerdict::TearDown
        }
    }

    /// One characteristic of the HID service, as discovery yields
    /// them. Returns the GATT operations to execute before the next
    /// event: subscribe to notifying characteristics right away, and
    /// read their report-reference descriptors. The Report Map
    /// characteristic is only cached here - reading it before
    /// discovery fully completes is unsafe on the BLE stack, so the
    /// read is deferred to [`Self::on_discovery_complete`].
    pub fn on_characteristic(
        &mut self,
        slot: usize,
        chr: &DiscoveredCharacteristic,
    ) -> Vec<GattOp, 2> {
        let mut ops = Vec::new();
        let Some(s) = self.slot_mut(slot) else {
            return ops;
        };
        if s.state != SlotState::Discovering {
            return ops;
        }
        if chr.uuid16 == REPORT_MAP_UUID {
            // Reset-on-start: an aborted earlier read must not leak
            // stale bytes into this one.
            s.map.reset();
            s.map_read_handle = chr.value_handle;
        } else if chr.notify && chr.ccc_handle != 0 {
            let sub = Subscription {
                value_handle: chr.value_handle,
                ccc_handle: chr.ccc_handle,
            };
            if s.subscriptions.push(sub).is_ok() {
                let _ = ops.push(GattOp::Subscribe {
                    value_handle: chr.value_handle,
                    ccc_handle: chr.ccc_handle,
                });
                if chr.report_ref_handle != 0
                    && s.handles.insert_report_ref(chr.report_ref_handle, chr.value_handle)
                {
                    let _ = ops.push(GattOp::ReadReportReference {
                        handle: chr.report_ref_handle,
                    });
                }
            }
            // A full subscription table drops the extra characteristic;
            // partial HID functionality beats aborting the slot.
        }
        ops
    }

    /// Value of a report-reference descriptor (`[report ID, report
    /// type]`) came back. Records value handle → report ID so the
    /// router can frame this characteristic's notifications.
    pub fn on_report_ref_value(&mut self, slot: usize, ref_handle: u16, value: &[u8]) -> bool {
        let Some(s) = self.slot_mut(slot) else {
            return false;
        };
        if !matches!(
            s.state,
            SlotState::Discovering | SlotState::AwaitingServiceEnd
        ) {
            return false;
        }
        let Some(&report_id) = value.first() else {
            return false;
        };
        match s.handles.char_for_ref(ref_handle) {
            Some(char_handle) => s.handles.set_report_id(char_handle, report_id),
            None => false,
        }
    }

    /// The discovery manager finished iterating the HID service's
    /// characteristics; descriptor reads may still be completing.
    pub fn on_service_discovered(&mut self, slot: usize) -> bool {
        match self.slot_mut(slot) {
            Some(s) if s.state == SlotState::Discovering => {
                s.state = SlotState::AwaitingServiceEnd;
                true
            }
            _ => false,
        }
    }

    /// No more services: the slot is now subscribed, and the deferred
    /// Report Map read (if any was cached) must be issued. Without a
    /// Report Map the slot goes straight to `Active` - notifications
    /// still route, they just carry no republished descriptor.
    pub fn on_discovery_complete(&mut self, slot: usize, now_ms: u64) -> DiscoveryOutcome {
        let Some(s) = self.slot_mut(slot) else {
            return DiscoveryOutcome::Ignored;
        };
        if s.state != SlotState::AwaitingServiceEnd {
            return DiscoveryOutcome::Ignored;
        }
        let setup_ms = now_ms.saturating_sub(s.link_open_ms);
        let map_read = if s.map_read_handle != 0 {
            s.state = SlotState::MapReading;
            Some(MapReadRequest {
                value_handle: s.map_read_handle,
            })
        } else {
            s.state = SlotState::Active;
            None
        };
        DiscoveryOutcome::Ready { map_read, setup_ms }
    }

    /// One read-response chunk of the Report Map. An empty chunk
    /// terminates the read: the assembled map is handed to the slot's
    /// sink and the slot becomes `Active`.
    pub fn on_report_map_chunk(&mut self, slot: usize, chunk: &[u8]) -> MapProgress {
        {
            let Some(s) = self.slot_mut(slot) else {
                return MapProgress::Ignored;
            };
            if s.state != SlotState::MapReading {
                return MapProgress::Ignored;
            }
            match s.map.on_chunk(chunk) {
                ChunkOutcome::Appended => return MapProgress::More,
                ChunkOutcome::Overflow => return MapProgress::Overflow,
                ChunkOutcome::Complete => s.state = SlotState::Active,
            }
        }
        // Borrow the slot's buffer and its sink at the same time.
        let Self { slots, sinks } = self;
        let map = slots[slot].map.data();
        if let Some(sink) = sinks[slot].as_mut() {
            sink.on_report_map(slot, map);
        }
        MapProgress::Complete { len: map.len() }
    }

    /// A notification arrived. Frames it (report-ID prefix when the
    /// handle is mapped, passthrough otherwise) and forwards it to the
    /// slot's sink. Returns the frame length, or `None` when nothing
    /// was emitted (empty payload, unsubscribed slot, no sink).
    pub fn on_notification(&mut self, slot: usize, value_handle: u16, data: &[u8]) -> Option<usize> {
        let frame = {
            let s = self.slot(slot)?;
            if !s.is_subscribed() {
                return None;
            }
            let report_id = s.handles.report_id_for(value_handle);
            router::frame_notification(report_id, data)?
        };
        let sink = self.sinks.get_mut(slot)?.as_mut()?;
        sink.on_input_report(slot, &frame);
        Some(frame.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_SUBSCRIPTIONS, REPORT_MAP_CAPACITY};
    use crate::hid::serial::CUSTOM_SERIAL_DESCRIPTOR;

    use std::cell::RefCell;
    use std::rc::Rc;

    /// Everything a slot emitted, shared between the bridge's sink and
    /// the test's view of it.
    #[derive(Default)]
    struct Record {
        maps: std::vec::Vec<(usize, std::vec::Vec<u8>)>,
        frames: std::vec::Vec<(usize, std::vec::Vec<u8>)>,
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Record>>);

    impl RecordingSink {
        fn rec(&self) -> std::cell::Ref<'_, Record> {
            self.0.borrow()
        }
    }

    impl SlotSink for RecordingSink {
        fn on_report_map(&mut self, slot: usize, map: &[u8]) {
            self.0.borrow_mut().maps.push((slot, map.to_vec()));
        }
        fn on_input_report(&mut self, slot: usize, frame: &[u8]) {
            self.0.borrow_mut().frames.push((slot, frame.to_vec()));
        }
    }

    fn recording_bridge() -> (PeripheralBridge<RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        let mut bridge = PeripheralBridge::new();
        bridge.register_sink(0, sink.clone()).unwrap();
        (bridge, sink)
    }

    fn peer() -> PeerAddress {
        PeerAddress::new([1, 2, 3, 4, 5, 6])
    }

    fn notify_char(value_handle: u16, ccc: u16, report_ref: u16) -> DiscoveredCharacteristic {
        DiscoveredCharacteristic {
            uuid16: crate::ble::HID_REPORT_UUID,
            value_handle,
            ccc_handle: ccc,
            report_ref_handle: report_ref,
            notify: true,
        }
    }

    fn map_char(value_handle: u16) -> DiscoveredCharacteristic {
        DiscoveredCharacteristic {
            uuid16: REPORT_MAP_UUID,
            value_handle,
            ccc_handle: 0,
            report_ref_handle: 0,
            notify: false,
        }
    }

    /// Drive a slot from claim to Discovering.
    fn secure_slot(bridge: &mut PeripheralBridge<RecordingSink>) -> usize {
        let slot = bridge.set_scan_target_name("Mouse").unwrap();
        assert!(bridge.on_connected(slot, peer(), 1_000));
        assert_eq!(
            bridge.on_security_result(slot, true),
            SecurityVerdict::StartDiscovery
        );
        slot
    }

    #[test]
    fn connect_requires_a_waiting_claim() {
        let (mut bridge, _) = recording_bridge();
        // No claim yet: stale connect is refused.
        assert!(!bridge.on_connected(0, peer(), 0));
        let slot = bridge.set_scan_target_name("Mouse").unwrap();
        assert!(bridge.on_connected(slot, peer(), 0));
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Securing));
        // Second connect for the same slot is stale.
        assert!(!bridge.on_connected(slot, peer(), 0));
    }

    #[test]
    fn security_failure_frees_the_slot() {
        let (mut bridge, _) = recording_bridge();
        let slot = bridge.set_scan_target_name("Mouse").unwrap();
        assert!(bridge.on_connected(slot, peer(), 0));
        assert_eq!(
            bridge.on_security_result(slot, false),
            SecurityVerdict::TearDown
        );
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Free));
        // The target can be claimed again afterwards.
        assert!(bridge.set_scan_target_name("Mouse").is_ok());
    }

    #[test]
    fn security_result_for_reset_slot_is_ignored() {
        let (mut bridge, _) = recording_bridge();
        let slot = bridge.set_scan_target_name("Mouse").unwrap();
        assert!(bridge.on_connected(slot, peer(), 0));
        bridge.release(slot).unwrap();
        assert_eq!(
            bridge.on_security_result(slot, true),
            SecurityVerdict::Ignored
        );
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Free));
    }

    #[test]
    fn notify_characteristic_yields_subscribe_then_ref_read() {
        let (mut bridge, _) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        let ops = bridge.on_characteristic(slot, &notify_char(0x1E, 0x1F, 0x20));
        assert_eq!(
            ops.as_slice(),
            &[
                GattOp::Subscribe {
                    value_handle: 0x1E,
                    ccc_handle: 0x1F
                },
                GattOp::ReadReportReference { handle: 0x20 },
            ]
        );
    }

    #[test]
    fn report_map_characteristic_is_cached_not_read() {
        let (mut bridge, _) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        let ops = bridge.on_characteristic(slot, &map_char(0x10));
        assert!(ops.is_empty());
        // The deferred read surfaces only at discovery completion.
        assert!(bridge.on_service_discovered(slot));
        match bridge.on_discovery_complete(slot, 1_200) {
            DiscoveryOutcome::Ready { map_read, setup_ms } => {
                assert_eq!(map_read, Some(MapReadRequest { value_handle: 0x10 }));
                assert_eq!(setup_ms, 200);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(bridge.slot_state(slot), Some(SlotState::MapReading));
    }

    #[test]
    fn discovery_without_report_map_goes_straight_to_active() {
        let (mut bridge, _) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &notify_char(0x1E, 0x1F, 0));
        assert!(bridge.on_service_discovered(slot));
        match bridge.on_discovery_complete(slot, 5_000) {
            DiscoveryOutcome::Ready { map_read, .. } => assert!(map_read.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Active));
    }

    #[test]
    fn subscription_table_overflow_drops_extras_without_aborting() {
        let (mut bridge, _) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        for i in 0..MAX_SUBSCRIPTIONS {
            let handle = 0x30 + 3 * i as u16;
            let ops = bridge.on_characteristic(slot, &notify_char(handle, handle + 1, 0));
            assert_eq!(ops.len(), 1);
        }
        // One more than the table holds: skipped, slot still advances.
        let ops = bridge.on_characteristic(slot, &notify_char(0x90, 0x91, 0));
        assert!(ops.is_empty());
        assert!(bridge.on_service_discovered(slot));
        assert!(matches!(
            bridge.on_discovery_complete(slot, 0),
            DiscoveryOutcome::Ready { .. }
        ));
    }

    #[test]
    fn report_ref_value_maps_the_characteristic() {
        let (mut bridge, _) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &notify_char(0x1E, 0x1F, 0x20));
        // [report ID, report type (input)]
        assert!(bridge.on_report_ref_value(slot, 0x20, &[0x02, 0x01]));
        // Unknown descriptor handle or empty value records nothing.
        assert!(!bridge.on_report_ref_value(slot, 0x99, &[0x05, 0x01]));
        assert!(!bridge.on_report_ref_value(slot, 0x20, &[]));
    }

    #[test]
    fn map_chunks_reassemble_and_deliver_to_sink() {
        let (mut bridge, view) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &map_char(0x10));
        bridge.on_service_discovered(slot);
        bridge.on_discovery_complete(slot, 0);

        let desc = CUSTOM_SERIAL_DESCRIPTOR;
        let (a, rest) = desc.split_at(8);
        let (b, c) = rest.split_at(7);
        assert_eq!(bridge.on_report_map_chunk(slot, a), MapProgress::More);
        assert_eq!(bridge.on_report_map_chunk(slot, b), MapProgress::More);
        assert_eq!(bridge.on_report_map_chunk(slot, c), MapProgress::More);
        assert_eq!(
            bridge.on_report_map_chunk(slot, &[]),
            MapProgress::Complete { len: desc.len() }
        );
        assert_eq!(bridge.slot_state(slot), Some(SlotState::Active));
        assert_eq!(view.rec().maps.len(), 1);
        assert_eq!(view.rec().maps[0].0, slot);
        assert_eq!(view.rec().maps[0].1.as_slice(), desc);
    }

    #[test]
    fn oversized_map_chunk_is_dropped_and_reported() {
        let (mut bridge, view) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &map_char(0x10));
        bridge.on_service_discovered(slot);
        bridge.on_discovery_complete(slot, 0);

        let fill = [0u8; REPORT_MAP_CAPACITY];
        assert_eq!(bridge.on_report_map_chunk(slot, &fill), MapProgress::More);
        assert_eq!(
            bridge.on_report_map_chunk(slot, &[0xFF]),
            MapProgress::Overflow
        );
        assert_eq!(
            bridge.on_report_map_chunk(slot, &[]),
            MapProgress::Complete {
                len: REPORT_MAP_CAPACITY
            }
        );
        assert_eq!(view.rec().maps[0].1.len(), REPORT_MAP_CAPACITY);
    }

    #[test]
    fn map_chunk_for_reset_slot_is_ignored() {
        let (mut bridge, view) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &map_char(0x10));
        bridge.on_service_discovered(slot);
        bridge.on_discovery_complete(slot, 0);
        bridge.release(slot).unwrap();
        assert_eq!(
            bridge.on_report_map_chunk(slot, &[1, 2, 3]),
            MapProgress::Ignored
        );
        assert!(view.rec().maps.is_empty());
    }

    #[test]
    fn notifications_route_only_once_subscribed() {
        let (mut bridge, view) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &notify_char(0x1E, 0x1F, 0x20));
        bridge.on_report_ref_value(slot, 0x20, &[0x02, 0x01]);
        // Still discovering: dropped.
        assert_eq!(bridge.on_notification(slot, 0x1E, &[9, 9]), None);
        bridge.on_service_discovered(slot);
        bridge.on_discovery_complete(slot, 0);
        // Subscribed (Active, no report map on this peripheral): routed.
        assert_eq!(bridge.on_notification(slot, 0x1E, &[9, 9]), Some(3));
        assert_eq!(view.rec().frames[0].1.as_slice(), &[0x02, 9, 9]);
    }

    #[test]
    fn unmapped_handle_routes_payload_unprefixed() {
        let (mut bridge, view) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &notify_char(0x1E, 0x1F, 0));
        bridge.on_service_discovered(slot);
        bridge.on_discovery_complete(slot, 0);
        assert_eq!(bridge.on_notification(slot, 0x1E, &[7, 8, 9]), Some(3));
        assert_eq!(view.rec().frames[0].1.as_slice(), &[7, 8, 9]);
    }

    #[test]
    fn empty_notification_is_a_no_op() {
        let (mut bridge, view) = recording_bridge();
        let slot = secure_slot(&mut bridge);
        bridge.on_characteristic(slot, &notify_char(0x1E, 0x1F, 0));
        bridge.on_service_discovered(slot);
        bridge.on_discovery_complete(slot, 0);
        assert_eq!(bridge.on_notification(slot, 0x1E, &[]), None);
        assert!(view.rec().frames.is_empty());
    }
}
