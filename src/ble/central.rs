//! SoftDevice central role: scanning, secure connection, and per-slot
//! link lifecycle.
//!
//! One scan task runs continuously and matches advertisements against
//! the claimed slots. A match stops the scan and hands the peer to the
//! owning slot's link task, which connects with a whitelist, raises
//! security, then runs GATT discovery and the notification pump. The
//! SoftDevice cannot scan and initiate at the same time, so the
//! scanner waits on [`SCAN_GATE`] until the link task finishes its
//! securing phase; discovery and report routing proceed with scanning
//! already running again.
//!
//! Every disconnect of an established link unpairs the peer (RAM keys
//! and flash record both dropped) and re-arms the slot's original scan
//! target, so the peripheral reconnects by pairing afresh.

use core::cell::RefCell;

use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use heapless::{String, Vec};
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    central, Address, Connection, EncryptError, EncryptionInfo, IdentityKey, MasterId,
    SecurityMode,
};
use nrf_softdevice::raw;
use nrf_softdevice::Softdevice;

use crate::ble::adv_parser::{contains_hid_service_uuid, extract_device_name};
use crate::ble::hogp_client::{run_hogp, MAX_REPORT_LEN};
use crate::ble::PeerAddress;
use crate::bond_store::{BondedPeer, StoreOp, PEER_STORE, STORE_OPS};
use crate::bridge::{PeripheralBridge, ScanTarget, SecurityVerdict, SlotState};
use crate::config::{self, MAX_PERIPHERALS};
use crate::error::{ClaimError, LinkError};
use crate::usb::hid_device::UnitSink;

/// Bridge core shared between the scanner, the link tasks, and the
/// input router.
pub type SharedBridge = Mutex<CriticalSectionRawMutex, PeripheralBridge<UnitSink>>;

/// Peripheral matched by the scanner, on its way to a slot's link task.
#[derive(Clone)]
pub struct MatchedPeer {
    pub address: Address,
    pub name: String<32>,
}

/// Notification payload handed from the GATT client callback to the
/// input router.
pub struct InboundReport {
    pub slot: usize,
    pub value_handle: u16,
    pub data: Vec<u8, MAX_REPORT_LEN>,
}

pub static INPUT_CH: Channel<CriticalSectionRawMutex, InboundReport, 16> = Channel::new();

/// One pending connect per slot.
pub static CONNECT_CH: [Channel<CriticalSectionRawMutex, MatchedPeer, 1>; MAX_PERIPHERALS] =
    [const { Channel::new() }; MAX_PERIPHERALS];

/// Released by a link task when its securing phase concludes, on every
/// path, so the scanner never waits on a dead attempt.
static SCAN_GATE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

struct PeerBond {
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

/// Security handler keeping peer encryption keys in RAM. Keys live
/// only as long as the link they secured: the disconnect teardown
/// calls [`Bonder::forget`], and a reconnecting peer pairs afresh.
pub struct Bonder {
    peers: RefCell<Vec<PeerBond, MAX_PERIPHERALS>>,
}

impl Bonder {
    pub fn new() -> Self {
        Self {
            peers: RefCell::new(Vec::new()),
        }
    }

    /// Drop the keys bonded to the given peer address, if any.
    pub fn forget(&self, address: Address) {
        let mut peers = self.peers.borrow_mut();
        if let Some(i) = peers.iter().position(|p| p.peer_id.is_match(address)) {
            peers.remove(i);
        }
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        let mut peers = self.peers.borrow_mut();
        if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
            existing.key = key;
            existing.peer_id = peer_id;
            return;
        }

        if peers.is_full() {
            peers.remove(0);
        }

        let _ = peers.push(PeerBond {
            master_id,
            key,
            peer_id,
        });
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers
            .borrow()
            .iter()
            .find_map(|p| (p.master_id == master_id).then_some(p.key))
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.peers.borrow().iter().find_map(|p| {
            p.peer_id
                .is_match(conn.peer_address())
                .then_some((p.master_id, p.key))
        })
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        info!("BLE security mode updated: {}", mode);
    }
}

/// Claims scan targets for every stored bonded peer, then for the
/// default peripheral names. A default name equal to a stored peer's
/// recorded name is skipped so one physical device cannot claim two
/// slots.
pub async fn claim_boot_targets(bridge: &'static SharedBridge) -> usize {
    let store = PEER_STORE.lock().await;
    let mut bridge = bridge.lock().await;
    let mut claimed = 0;

    for peer in store.peers() {
        match bridge.set_scan_target_addr(PeerAddress::new(peer.address.bytes())) {
            Ok(slot) => {
                info!("slot {} claimed for stored peer {}", slot, peer.name.as_str());
                claimed += 1;
            }
            Err(e) => warn!("stored peer claim failed: {}", e),
        }
    }

    for name in config::DEFAULT_TARGET_NAMES {
        if store.peers().iter().any(|p| p.name.as_str() == *name) {
            continue;
        }
        match bridge.set_scan_target_name(name) {
            Ok(slot) => {
                info!("slot {} claimed for name {}", slot, name);
                claimed += 1;
            }
            Err(ClaimError::PoolExhausted) => break,
            Err(e) => warn!("claim for name {} failed: {}", name, e),
        }
    }

    claimed
}

/// Continuous scanner. Parses each advertisement, asks the bridge for
/// a waiting claim, and hands the matched peer to that slot's link
/// task, pausing until the link attempt clears its securing phase.
pub async fn scan_task(sd: &'static Softdevice, bridge: &'static SharedBridge) -> ! {
    info!("BLE scan task started");

    loop {
        let scan_config = central::ScanConfig {
            // Active scan: many peripherals only put their name in the
            // scan response.
            active: true,
            ..Default::default()
        };

        let matched = central::scan(sd, &scan_config, |params| {
            let data = unsafe {
                core::slice::from_raw_parts(params.data.p_data, params.data.len as usize)
            };

            if !contains_hid_service_uuid(data) {
                return None;
            }

            let address = Address::from_raw(params.peer_addr);
            let peer = PeerAddress::new(address.bytes());
            let name = extract_device_name(data);

            // The bridge is busy only for short sync sections; a held
            // lock just skips this advertisement.
            let slot = {
                let bridge = bridge.try_lock().ok()?;
                bridge.match_adv(&peer, name.as_deref())?
            };

            Some((
                slot,
                MatchedPeer {
                    address,
                    name: name.unwrap_or_default(),
                },
            ))
        })
        .await;

        match matched {
            Ok((slot, peer)) => {
                info!("slot {} matched peripheral {}", slot, peer.name.as_str());
                CONNECT_CH[slot].send(peer).await;
                SCAN_GATE.wait().await;
            }
            Err(_) => {
                warn!("BLE scan ended with error");
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Drives one slot's links, one at a time: connect, secure, discover,
/// route, tear down, re-arm.
pub async fn slot_link_task(
    sd: &'static Softdevice,
    bridge: &'static SharedBridge,
    bonder: &'static Bonder,
    slot: usize,
) -> ! {
    loop {
        let peer = CONNECT_CH[slot].receive().await;

        // Re-arming uses the original target, not the matched address:
        // a name claim must survive the peer rotating its random
        // address between connections.
        let rearm = match bridge.lock().await.slot(slot) {
            Some(s) => s.target().clone(),
            None => ScanTarget::None,
        };

        let result = run_link(sd, bridge, bonder, slot, &peer).await;

        match result {
            Err(LinkError::ConnectFailed) => {
                // The claim stands; the scanner matches the peripheral
                // again on its next advertisement.
                warn!("slot {} connect failed, rescanning", slot);
            }
            Err(LinkError::SecurityFailed) => {
                warn!("slot {} pairing failed, slot released", slot);
            }
            Ok(()) | Err(LinkError::DiscoveryFailed) => {
                if let Err(LinkError::DiscoveryFailed) = result {
                    warn!("slot {} link dropped during discovery", slot);
                }
                if bridge.lock().await.slot_state(slot) == Some(SlotState::Claimed) {
                    // Stale connect refused before the slot took the
                    // link; the claim is still waiting.
                    continue;
                }
                if bridge.lock().await.on_disconnected(slot).is_some() {
                    info!("slot {} disconnected, unpairing {}", slot, peer.name.as_str());
                    bonder.forget(peer.address);
                    STORE_OPS.send(StoreOp::Forgotten(peer.address)).await;
                    rearm_target(bridge, slot, &rearm).await;
                }
            }
        }
    }
}

async fn rearm_target(bridge: &'static SharedBridge, slot: usize, target: &ScanTarget) {
    let mut bridge = bridge.lock().await;
    let claimed = match target {
        ScanTarget::Address(addr) => bridge.set_scan_target_addr(*addr).is_ok(),
        ScanTarget::Name(name) => bridge.set_scan_target_name(name.as_str()).is_ok(),
        ScanTarget::None => return,
    };
    if claimed {
        info!("slot {} target re-armed for reconnection", slot);
    } else {
        warn!("slot {} target could not be re-armed", slot);
    }
}

async fn wait_for_secure_link(conn: &Connection) -> bool {
    for _ in 0..25 {
        match conn.security_mode() {
            SecurityMode::NoAccess | SecurityMode::Open => {
                Timer::after(Duration::from_millis(200)).await
            }
            _ => return true,
        }
    }
    false
}

/// One connection attempt end to end. Releases [`SCAN_GATE`] exactly
/// once, as soon as the securing phase is decided.
async fn run_link(
    sd: &'static Softdevice,
    bridge: &'static SharedBridge,
    bonder: &'static Bonder,
    slot: usize,
    peer: &MatchedPeer,
) -> Result<(), LinkError> {
    info!("slot {} connecting to {}", slot, peer.name.as_str());

    let whitelist = [&peer.address];
    let conn_cfg = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
            max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
            slave_latency: config::BLE_SLAVE_LATENCY,
            conn_sup_timeout: config::BLE_SUP_TIMEOUT,
        },
        att_mtu: Some(config::BLE_ATT_MTU),
        ..Default::default()
    };

    let connect = central::connect_with_security(sd, &conn_cfg, bonder);
    let conn = match with_timeout(
        Duration::from_secs(config::BLE_CONNECT_TIMEOUT_SECS),
        connect,
    )
    .await
    {
        Ok(Ok(conn)) => conn,
        Ok(Err(_)) | Err(_) => {
            SCAN_GATE.signal(());
            return Err(LinkError::ConnectFailed);
        }
    };

    let now_ms = Instant::now().as_millis();
    let peer_addr = PeerAddress::new(peer.address.bytes());
    if !bridge.lock().await.on_connected(slot, peer_addr, now_ms) {
        // The claim changed while the connect was in flight.
        let _ = conn.disconnect();
        SCAN_GATE.signal(());
        return Ok(());
    }

    let secure_ok = match conn.encrypt() {
        Ok(()) => wait_for_secure_link(&conn).await,
        Err(EncryptError::PeerKeysNotFound) => {
            if conn.request_pairing().is_ok() {
                wait_for_secure_link(&conn).await
            } else {
                false
            }
        }
        Err(_) => false,
    };

    // Securing is decided; scanning for other claims may resume.
    SCAN_GATE.signal(());

    match bridge.lock().await.on_security_result(slot, secure_ok) {
        SecurityVerdict::StartDiscovery => {}
        SecurityVerdict::TearDown => {
            let _ = conn.disconnect();
            return Err(LinkError::SecurityFailed);
        }
        SecurityVerdict::Ignored => {
            let _ = conn.disconnect();
            return Ok(());
        }
    }

    info!("slot {} link secured", slot);
    STORE_OPS
        .send(StoreOp::Bonded(BondedPeer::new(
            peer.address,
            peer.name.as_str(),
        )))
        .await;

    run_hogp(&conn, slot, bridge).await
}

/// Feeds queued notifications into the bridge core, which frames them
/// and forwards them to the USB side.
pub async fn input_router_task(bridge: &'static SharedBridge) -> ! {
    loop {
        let report = INPUT_CH.receive().await;
        let _ = bridge
            .lock()
            .await
            .on_notification(report.slot, report.value_handle, &report.data);
    }
}
