//! Persistent record of bonded peripherals.
//!
//! The SoftDevice leaves bond storage to the application. Encryption
//! keys stay in RAM (see the bonder in `ble::central`); what goes to
//! flash is the peer's identity - address and advertised name - so the
//! bridge can re-claim known peripherals after a power cycle. Records
//! live in the nRF52840's internal flash behind `sequential-storage`,
//! which handles wear levelling over the reserved pages.
//!
//! Record layout, packed after a leading count byte:
//!   `[6 addr][1 addr type][1 name_len][name bytes...]`

use crate::config::{MAX_PERIPHERALS, STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use crate::error::StoreError;
use defmt::{debug, error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use heapless::Vec;
use nrf_softdevice::ble::Address;
use nrf_softdevice::Flash;

/// Flash page size for nRF52840 (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

const STORAGE_START: u32 = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE;
const STORAGE_END: u32 = (STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Key for the bonded-peer list in the map storage.
const KEY_BONDED_PEERS: u8 = 0x01;

/// Serialized upper bound: count byte + 4 peers of (6 + 1 + 1 + 32).
const MAX_RECORD_SIZE: usize = 256;

/// Identity of a peripheral the bridge has bonded with.
#[derive(Clone, Debug)]
pub struct BondedPeer {
    pub address: Address,
    /// Advertised name at bond time, for logs and duplicate-claim
    /// suppression. May be empty.
    pub name: heapless::String<32>,
}

impl BondedPeer {
    pub fn new(address: Address, name: &str) -> Self {
        let mut n: heapless::String<32> = heapless::String::new();
        for c in name.chars().take(32) {
            let _ = n.push(c);
        }
        Self { address, name: n }
    }

    fn serialize(&self, buf: &mut [u8]) -> usize {
        let addr_type = match self.address.address_type() {
            nrf_softdevice::ble::AddressType::Public => 0u8,
            nrf_softdevice::ble::AddressType::RandomStatic => 1u8,
            nrf_softdevice::ble::AddressType::RandomPrivateResolvable => 2u8,
            nrf_softdevice::ble::AddressType::RandomPrivateNonResolvable => 3u8,
            nrf_softdevice::ble::AddressType::Anonymous => 4u8,
        };
        let name_bytes = self.name.as_bytes();

        let total = 6 + 1 + 1 + name_bytes.len();
        if buf.len() < total {
            return 0;
        }

        buf[0..6].copy_from_slice(&self.address.bytes());
        buf[6] = addr_type;
        buf[7] = name_bytes.len() as u8;
        buf[8..8 + name_bytes.len()].copy_from_slice(name_bytes);
        total
    }

    fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }

        let mut addr_bytes = [0u8; 6];
        addr_bytes.copy_from_slice(&data[0..6]);
        let addr_type = match data[6] {
            0 => nrf_softdevice::ble::AddressType::Public,
            1 => nrf_softdevice::ble::AddressType::RandomStatic,
            2 => nrf_softdevice::ble::AddressType::RandomPrivateResolvable,
            3 => nrf_softdevice::ble::AddressType::RandomPrivateNonResolvable,
            4 => nrf_softdevice::ble::AddressType::Anonymous,
            _ => nrf_softdevice::ble::AddressType::RandomStatic,
        };
        let name_len = data[7] as usize;

        if data.len() < 8 + name_len {
            return None;
        }

        let mut name: heapless::String<32> = heapless::String::new();
        if let Ok(s) = core::str::from_utf8(&data[8..8 + name_len]) {
            for c in s.chars().take(32) {
                let _ = name.push(c);
            }
        }

        Some(Self {
            address: Address::new(addr_type, addr_bytes),
            name,
        })
    }
}

/// In-memory cache of bonded peers, synced with flash.
pub struct PeerStore {
    peers: Vec<BondedPeer, MAX_PERIPHERALS>,
    /// True when the cache differs from flash.
    dirty: bool,
}

impl PeerStore {
    pub const fn new() -> Self {
        Self {
            peers: Vec::new(),
            dirty: false,
        }
    }

    pub async fn load_from_flash(
        &mut self,
        flash: &mut impl embedded_storage_async::nor_flash::NorFlash,
    ) -> Result<(), StoreError> {
        let flash_range = STORAGE_START..STORAGE_END;
        let mut buf = [0u8; MAX_RECORD_SIZE];

        self.peers.clear();
        self.dirty = false;

        match sequential_storage::map::fetch_item::<u8, &[u8], _>(
            flash,
            flash_range,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_BONDED_PEERS,
        )
        .await
        {
            Ok(Some(data)) => {
                self.deserialize_all(data);
                info!("Loaded {} bonded peers from flash", self.peers.len());
                Ok(())
            }
            Ok(None) => {
                info!("No bonded peers in flash");
                Ok(())
            }
            Err(e) => {
                error!("Flash read error: {:?}", defmt::Debug2Format(&e));
                Err(StoreError::Flash)
            }
        }
    }

    pub async fn save_to_flash(
        &mut self,
        flash: &mut impl embedded_storage_async::nor_flash::NorFlash,
    ) -> Result<(), StoreError> {
        if !self.dirty {
            debug!("PeerStore: no changes to save");
            return Ok(());
        }

        let flash_range = STORAGE_START..STORAGE_END;
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let mut data_buf = [0u8; MAX_RECORD_SIZE];

        let len = self.serialize_all(&mut data_buf);
        let item = &data_buf[..len];

        match sequential_storage::map::store_item::<u8, &[u8], _>(
            flash,
            flash_range,
            &mut sequential_storage::cache::NoCache::new(),
            &mut buf,
            &KEY_BONDED_PEERS,
            &item,
        )
        .await
        {
            Ok(_) => {
                info!("Saved {} bonded peers to flash", self.peers.len());
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                error!("Flash write error: {:?}", defmt::Debug2Format(&e));
                Err(StoreError::Flash)
            }
        }
    }

    fn serialize_all(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.peers.len() as u8;
        let mut offset = 1;
        for peer in &self.peers {
            offset += peer.serialize(&mut buf[offset..]);
        }
        offset
    }

    fn deserialize_all(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let count = data[0] as usize;
        let mut offset = 1;

        for _ in 0..count {
            if offset + 8 > data.len() {
                break;
            }
            let record_len = 8 + data[offset + 7] as usize;
            if offset + record_len > data.len() {
                break;
            }

            if let Some(peer) = BondedPeer::deserialize(&data[offset..offset + record_len]) {
                if !self.peers.is_full() {
                    let _ = self.peers.push(peer);
                }
            }
            offset += record_len;
        }
    }

    /// Record a freshly bonded peer. An existing record with the same
    /// address is updated in place; when full, the oldest entry is
    /// evicted.
    pub fn add(&mut self, peer: BondedPeer) {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.address == peer.address) {
            if existing.name != peer.name {
                existing.name = peer.name;
                self.dirty = true;
            }
            return;
        }

        if self.peers.is_full() {
            warn!("bond store full, evicting oldest entry");
            self.peers.remove(0);
        }
        let _ = self.peers.push(peer);
        self.dirty = true;
    }

    /// Forget the peer with the given address. Returns whether a
    /// record was removed.
    pub fn remove(&mut self, address: &Address) -> bool {
        match self.peers.iter().position(|p| p.address == *address) {
            Some(i) => {
                self.peers.remove(i);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn peers(&self) -> &[BondedPeer] {
        &self.peers
    }
}

/// Global bonded-peer cache, shared between boot-time claiming and the
/// store task.
pub static PEER_STORE: Mutex<CriticalSectionRawMutex, PeerStore> = Mutex::new(PeerStore::new());

/// Mutations queued by the connection tasks; applied (and persisted)
/// by [`store_task`], the sole owner of the flash handle.
pub enum StoreOp {
    Bonded(BondedPeer),
    Forgotten(Address),
}

pub static STORE_OPS: Channel<CriticalSectionRawMutex, StoreOp, 4> = Channel::new();

/// Applies queued store mutations and persists them. On a flash write
/// error the cache stays dirty, so the next mutation retries the save.
pub async fn store_task(mut flash: Flash) -> ! {
    loop {
        let op = STORE_OPS.receive().await;
        let mut store = PEER_STORE.lock().await;
        match op {
            StoreOp::Bonded(peer) => store.add(peer),
            StoreOp::Forgotten(address) => {
                store.remove(&address);
            }
        }
        if store.save_to_flash(&mut flash).await.is_err() {
            warn!("Bond store changes not persisted, will retry on next change");
        }
    }
}
