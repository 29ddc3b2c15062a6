//! Firmware entry point for the nRF52840 bridge.
//!
//! Brings up the SoftDevice, loads the bond store, claims the boot
//! scan targets, then hands everything to the long-running tasks: one
//! scanner, one link task per slot, the input router, the bond store
//! writer, and the USB device with its publisher.

#![no_std]
#![no_main]

use core::mem;

use defmt::{info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::peripherals;
use embassy_nrf::usb::vbus_detect::SoftwareVbusDetect;
use embassy_sync::mutex::Mutex;
use nrf_softdevice::{raw, Flash, SocEvent, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

use hogbridge::ble::central::{
    claim_boot_targets, input_router_task, scan_task, slot_link_task, Bonder, SharedBridge,
};
use hogbridge::bond_store::{self, PEER_STORE};
use hogbridge::config::{BLE_ATT_MTU, MAX_PERIPHERALS};
use hogbridge::usb::hid_device::{publisher_task, run_usb, watch_bus, UnitSink};
use hogbridge::PeripheralBridge;

static BRIDGE: StaticCell<SharedBridge> = StaticCell::new();
static BONDER: StaticCell<Bonder> = StaticCell::new();
// The SoftDevice owns the POWER peripheral, so VBUS state cannot come
// from the POWER interrupt; SoC events feed this detector instead.
static VBUS: StaticCell<SoftwareVbusDetect> = StaticCell::new();

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("hogbridge starting");

    // Interrupt priorities 0, 1 and 4 are reserved by the SoftDevice.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::USBD.set_priority(Priority::P2);

    let sd_config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: MAX_PERIPHERALS as u8,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: BLE_ATT_MTU,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: raw::BLE_GAP_ADV_SET_COUNT_DEFAULT as u8,
            periph_role_count: 0,
            central_role_count: MAX_PERIPHERALS as u8,
            // One security procedure at a time; link attempts are
            // serialized through the scan gate anyway.
            central_sec_count: 1,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: b"hogbridge" as *const u8 as _,
            current_len: 9,
            max_len: 9,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    };
    let sd = Softdevice::enable(&sd_config);

    let vbus = VBUS.init(SoftwareVbusDetect::new(true, true));
    unwrap!(spawner.spawn(softdevice_task(sd, vbus)));

    let mut core = PeripheralBridge::new();
    for slot in 0..MAX_PERIPHERALS {
        unwrap!(core.register_sink(slot, UnitSink));
    }
    let bridge = BRIDGE.init(Mutex::new(core));
    let bonder = BONDER.init(Bonder::new());

    let mut flash = Flash::take(sd);
    if PEER_STORE.lock().await.load_from_flash(&mut flash).await.is_err() {
        warn!("starting with an empty bond store");
    }
    let claimed = claim_boot_targets(bridge).await;
    info!("{} scan targets claimed at boot", claimed);

    unwrap!(spawner.spawn(store_task(flash)));
    unwrap!(spawner.spawn(usb_device_task(p.USBD, vbus)));
    unwrap!(spawner.spawn(usb_publish_task()));
    unwrap!(spawner.spawn(usb_bus_task()));
    unwrap!(spawner.spawn(ble_scan_task(sd, bridge)));
    for slot in 0..MAX_PERIPHERALS {
        unwrap!(spawner.spawn(link_task(sd, bridge, bonder, slot)));
    }
    unwrap!(spawner.spawn(router_task(bridge)));

    info!("hogbridge up - {} connection slots", MAX_PERIPHERALS);
}

/// Runs the SoftDevice and feeds USB power events to the VBUS
/// detector.
#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice, vbus: &'static SoftwareVbusDetect) -> ! {
    unsafe {
        raw::sd_power_usbdetected_enable(1);
        raw::sd_power_usbpwrrdy_enable(1);
        raw::sd_power_usbremoved_enable(1);
    }
    sd.run_with_callback(|event| match event {
        SocEvent::PowerUsbDetected => vbus.detected(true),
        SocEvent::PowerUsbRemoved => vbus.detected(false),
        SocEvent::PowerUsbPowerReady => vbus.ready(),
        _ => {}
    })
    .await
}

#[embassy_executor::task]
async fn store_task(flash: Flash) -> ! {
    bond_store::store_task(flash).await
}

#[embassy_executor::task]
async fn usb_device_task(usbd: peripherals::USBD, vbus: &'static SoftwareVbusDetect) -> ! {
    run_usb(usbd, vbus).await
}

#[embassy_executor::task]
async fn usb_publish_task() -> ! {
    publisher_task().await
}

#[embassy_executor::task]
async fn usb_bus_task() -> ! {
    watch_bus().await
}

#[embassy_executor::task]
async fn ble_scan_task(sd: &'static Softdevice, bridge: &'static SharedBridge) -> ! {
    scan_task(sd, bridge).await
}

#[embassy_executor::task(pool_size = MAX_PERIPHERALS)]
async fn link_task(
    sd: &'static Softdevice,
    bridge: &'static SharedBridge,
    bonder: &'static Bonder,
    slot: usize,
) -> ! {
    slot_link_task(sd, bridge, bonder, slot).await
}

#[embassy_executor::task]
async fn router_task(bridge: &'static SharedBridge) -> ! {
    input_router_task(bridge).await
}
