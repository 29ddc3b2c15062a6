//! GATT client for the HID-over-GATT service.
//!
//! HOGP peripherals expose an open-ended set of Report characteristics
//! (a combo keyboard+touchpad easily carries five or more), so the
//! client collects every characteristic the discovery procedure yields
//! instead of binding a fixed layout. The slot state machine then
//! decides, characteristic by characteristic, what to subscribe to and
//! which descriptors to read; this module executes those operations on
//! the live link and pumps notifications back in.

use defmt::{info, warn};
use embassy_time::Instant;
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{
    self, Characteristic, Descriptor, DiscoverError, HvxType,
};
use nrf_softdevice::ble::{Connection, Uuid};

use crate::ble::central::{InboundReport, SharedBridge, INPUT_CH};
use crate::ble::{
    DiscoveredCharacteristic, CCC_UUID, HID_REPORT_UUID, HID_SERVICE_UUID, REPORT_MAP_UUID,
    REPORT_REF_UUID,
};
use crate::bridge::{DiscoveryOutcome, GattOp, MapProgress};
use crate::config::{BLE_ATT_MTU, HANDLE_MAP_CAPACITY, MAX_FRAME_LEN, REPORT_MAP_CAPACITY};
use crate::error::LinkError;

/// Largest notification payload carried through the input channel. The
/// router prepends at most one report-ID byte, so a maximal payload
/// still frames into [`MAX_FRAME_LEN`].
pub const MAX_REPORT_LEN: usize = MAX_FRAME_LEN - 1;

/// Notification routed out of [`gatt_client::run`]'s sync callback.
pub enum HogpEvent {
    InputReport {
        value_handle: u16,
        data: Vec<u8, MAX_REPORT_LEN>,
    },
}

/// Client over the HID service (0x1812) that records every discovered
/// characteristic with its CCC and Report Reference descriptor handles.
pub struct HogpClient {
    characteristics: Vec<DiscoveredCharacteristic, HANDLE_MAP_CAPACITY>,
}

impl HogpClient {
    pub fn characteristics(&self) -> &[DiscoveredCharacteristic] {
        &self.characteristics
    }
}

impl gatt_client::Client for HogpClient {
    type Event = HogpEvent;

    fn on_hvx(
        &self,
        _conn: &Connection,
        type_: HvxType,
        handle: u16,
        data: &[u8],
    ) -> Option<Self::Event> {
        if type_ != HvxType::Notification {
            return None;
        }
        let Ok(data) = Vec::from_slice(data) else {
            warn!("oversized notification on handle {:#x} dropped", handle);
            return None;
        };
        Some(HogpEvent::InputReport {
            value_handle: handle,
            data,
        })
    }

    fn uuid() -> Uuid {
        Uuid::new_16(HID_SERVICE_UUID)
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self {
            characteristics: Vec::new(),
        }
    }

    fn discovered_characteristic(
        &mut self,
        characteristic: &Characteristic,
        descriptors: &[Descriptor],
    ) {
        let uuid16 = if characteristic.uuid == Some(Uuid::new_16(REPORT_MAP_UUID)) {
            REPORT_MAP_UUID
        } else if characteristic.uuid == Some(Uuid::new_16(HID_REPORT_UUID)) {
            HID_REPORT_UUID
        } else {
            0
        };

        let mut ccc_handle = 0;
        let mut report_ref_handle = 0;
        for desc in descriptors {
            if desc.uuid == Some(Uuid::new_16(CCC_UUID)) {
                ccc_handle = desc.handle;
            } else if desc.uuid == Some(Uuid::new_16(REPORT_REF_UUID)) {
                report_ref_handle = desc.handle;
            }
        }

        let entry = DiscoveredCharacteristic {
            uuid16,
            value_handle: characteristic.handle_value,
            ccc_handle,
            report_ref_handle,
            notify: characteristic.props.notify() != 0,
        };
        if self.characteristics.push(entry).is_err() {
            warn!("HID service exposes more characteristics than the table holds");
        }
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        if self.characteristics.is_empty() {
            return Err(DiscoverError::ServiceIncomplete);
        }
        Ok(())
    }
}

/// Discovers the HID service, walks the slot through subscription
/// setup and the deferred Report Map read, then routes notifications
/// until the connection closes.
pub async fn run_hogp(
    conn: &Connection,
    slot: usize,
    bridge: &'static SharedBridge,
) -> Result<(), LinkError> {
    info!("slot {} discovering HID service", slot);

    let client: HogpClient = gatt_client::discover(conn).await.map_err(|e| {
        warn!("slot {} HID service discovery failed: {}", slot, e);
        LinkError::DiscoveryFailed
    })?;
    info!(
        "slot {} HID service discovered ({} characteristics)",
        slot,
        client.characteristics().len()
    );

    for chr in client.characteristics() {
        let ops = bridge.lock().await.on_characteristic(slot, chr);
        for op in &ops {
            execute_op(conn, slot, bridge, op).await;
        }
    }

    bridge.lock().await.on_service_discovered(slot);

    let outcome = bridge
        .lock()
        .await
        .on_discovery_complete(slot, Instant::now().as_millis());
    match outcome {
        DiscoveryOutcome::Ignored => {
            // Slot was reset while discovery ran; the caller drops the
            // link.
            return Ok(());
        }
        DiscoveryOutcome::Ready { map_read, setup_ms } => {
            info!("slot {} subscriptions in place after {} ms", slot, setup_ms);
            match map_read {
                Some(req) => read_report_map(conn, slot, bridge, req.value_handle).await?,
                None => warn!("slot {} peripheral exposes no Report Map", slot),
            }
        }
    }

    info!("slot {} routing input reports", slot);
    let _disconnected = gatt_client::run(conn, &client, |event| {
        let HogpEvent::InputReport { value_handle, data } = event;
        if INPUT_CH
            .try_send(InboundReport {
                slot,
                value_handle,
                data,
            })
            .is_err()
        {
            warn!("slot {} input report channel full - dropping report", slot);
        }
    })
    .await;

    info!("slot {} connection closed", slot);
    Ok(())
}

async fn execute_op(conn: &Connection, slot: usize, bridge: &SharedBridge, op: &GattOp) {
    match *op {
        GattOp::Subscribe {
            value_handle,
            ccc_handle,
        } => {
            // 0x0001 = notifications on, indications off.
            match gatt_client::write(conn, ccc_handle, &[0x01, 0x00]).await {
                Ok(()) => info!("slot {} subscribed to report {:#x}", slot, value_handle),
                Err(_) => warn!(
                    "slot {} could not enable notifications on {:#x}",
                    slot, value_handle
                ),
            }
        }
        GattOp::ReadReportReference { handle } => {
            // Report Reference payload is [report ID, report type].
            let mut buf = [0u8; 4];
            match gatt_client::read(conn, handle, &mut buf).await {
                Ok(n) => {
                    bridge
                        .lock()
                        .await
                        .on_report_ref_value(slot, handle, &buf[..n]);
                }
                Err(_) => warn!("slot {} report reference read {:#x} failed", slot, handle),
            }
        }
    }
}

/// Issues the deferred Report Map read and feeds the bytes through the
/// slot's reassembly buffer.
///
/// The read is a single ATT read request, which delivers at most
/// `BLE_ATT_MTU - 1` bytes; maps larger than that would need read-blob
/// continuation the platform client does not expose. A read that fills
/// the response exactly is flagged, since it usually means the map was
/// cut off.
async fn read_report_map(
    conn: &Connection,
    slot: usize,
    bridge: &SharedBridge,
    value_handle: u16,
) -> Result<(), LinkError> {
    let mut buf = [0u8; REPORT_MAP_CAPACITY];
    let n = gatt_client::read(conn, value_handle, &mut buf).await.map_err(|e| {
        warn!("slot {} report map read failed: {}", slot, e);
        LinkError::DiscoveryFailed
    })?;

    if n == 0 {
        warn!("slot {} report map read returned no data", slot);
        return Err(LinkError::DiscoveryFailed);
    }
    if n == usize::from(BLE_ATT_MTU) - 1 {
        warn!(
            "slot {} report map filled the read response ({} bytes), may be truncated",
            slot, n
        );
    }

    match bridge.lock().await.on_report_map_chunk(slot, &buf[..n]) {
        MapProgress::Ignored => return Ok(()),
        MapProgress::Overflow => {
            warn!("slot {} report map chunk overflowed the buffer", slot)
        }
        _ => {}
    }
    // Empty chunk terminates the read; the assembled map goes to the
    // slot's sink inside this call.
    match bridge.lock().await.on_report_map_chunk(slot, &[]) {
        MapProgress::Complete { len } => {
            info!("slot {} report map complete ({} bytes)", slot, len);
        }
        _ => {}
    }
    Ok(())
}
