//! USB HID composite device with one interface per bridge slot.
//!
//! Initialises the Embassy USB stack on the nRF52840 hardware USB
//! peripheral and exposes [`MAX_HID_UNITS`] HID interfaces. Interface
//! descriptors are not fixed: every unit boots with the placeholder
//! serial descriptor and swaps to the report map of whatever BLE
//! peripheral lands in the matching slot. Embassy bakes descriptors
//! into the device at build time, so a swap tears the whole device
//! down and rebuilds it from the staged descriptor set - the host sees
//! a detach and a re-enumeration, exactly as if the dongle had been
//! replugged.
//!
//! VBUS sensing goes through [`SoftwareVbusDetect`]: the SoftDevice
//! owns the POWER peripheral, so USB power state arrives as SoC events
//! (see the softdevice task in `main`), not as a CLOCK_POWER interrupt.

use core::cell::RefCell;

use crate::bridge::SlotSink;
use crate::config::{self, MAX_FRAME_LEN, MAX_HID_UNITS, REPORT_MAP_CAPACITY};
use crate::error::PortError;
use crate::hid::items::detect_class;
use crate::hid::CompositeDescriptor;
use crate::usb::units::HidUnitSet;
use crate::usb::UsbHidPort;
use defmt::{debug, info, warn};
use embassy_futures::select::{select3, Either3};
use embassy_nrf::usb::vbus_detect::SoftwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{self, bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_usb::class::hid::{Config as HidConfig, HidWriter, ReportId, RequestHandler, State};
use embassy_usb::control::OutResponse;
use embassy_usb::{Builder, Config};
use heapless::Vec;

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
});

type UsbDriver<'d> = Driver<'d, peripherals::USBD, &'static SoftwareVbusDetect>;
type UnitWriter<'d> = HidWriter<'d, UsbDriver<'d>, MAX_FRAME_LEN>;

/// A report map a slot finished assembling, queued for republication.
pub struct PublishRequest {
    pub unit: usize,
    pub map: Vec<u8, REPORT_MAP_CAPACITY>,
}

/// A framed input report on its way to a HID interrupt endpoint.
pub struct OutboundFrame {
    pub unit: usize,
    pub data: Vec<u8, MAX_FRAME_LEN>,
}

static PUBLISH_CH: Channel<CriticalSectionRawMutex, PublishRequest, 2> = Channel::new();
static FRAME_CH: Channel<CriticalSectionRawMutex, OutboundFrame, 16> = Channel::new();

/// Descriptor bytes per unit, as last registered through the port. The
/// rebuild loop snapshots this set each time it constructs the device.
static STAGED: BlockingMutex<
    CriticalSectionRawMutex,
    RefCell<[Vec<u8, REPORT_MAP_CAPACITY>; MAX_HID_UNITS]>,
> = BlockingMutex::new(RefCell::new([const { Vec::new() }; MAX_HID_UNITS]));

/// Fires when the staged descriptor set changed and the device must
/// re-enumerate.
static REBUILD: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static USB_SUSPEND_SIGNAL: Signal<CriticalSectionRawMutex, bool> = Signal::new();

/// The unit set behind the published interfaces. The GetReport handler
/// consults it for synthesized touchpad feature reports.
static UNITS: Mutex<CriticalSectionRawMutex, HidUnitSet> = Mutex::new(HidUnitSet::new());

/// USB bus suspend/resume signal.
///
/// Emits `true` when the host suspends the bus and `false` when resumed.
pub fn suspend_signal() -> &'static Signal<CriticalSectionRawMutex, bool> {
    &USB_SUSPEND_SIGNAL
}

/// Per-slot bridge sink: slot `i` feeds HID unit `i`. Both callbacks
/// run inside BLE task context, so they only queue; the USB tasks do
/// the actual work.
pub struct UnitSink;

impl SlotSink for UnitSink {
    fn on_report_map(&mut self, slot: usize, map: &[u8]) {
        let Ok(copy) = Vec::from_slice(map) else {
            warn!("slot {} report map too large to republish", slot);
            return;
        };
        if PUBLISH_CH
            .try_send(PublishRequest { unit: slot, map: copy })
            .is_err()
        {
            warn!("slot {} publish queue full - dropping report map", slot);
        }
    }

    fn on_input_report(&mut self, slot: usize, frame: &[u8]) {
        let Ok(copy) = Vec::from_slice(frame) else {
            warn!("slot {} input report too large for a USB frame", slot);
            return;
        };
        if FRAME_CH
            .try_send(OutboundFrame { unit: slot, data: copy })
            .is_err()
        {
            warn!("slot {} USB frame channel full - dropping report", slot);
        }
    }
}

/// Port backing the unit set. Registration stages descriptor bytes;
/// `enable` kicks the rebuild loop, which detaches the running device
/// and constructs the next one from the staged set.
pub struct NrfUsbPort;

impl UsbHidPort for NrfUsbPort {
    fn disable(&mut self) -> Result<(), PortError> {
        // The rebuild loop drops the whole device in one go; there is
        // nothing to tear down ahead of time.
        Ok(())
    }

    fn register(&mut self, unit: usize, descriptor: &[u8]) -> Result<(), PortError> {
        STAGED.lock(|staged| {
            let mut staged = staged.borrow_mut();
            let buf = staged.get_mut(unit).ok_or(PortError::Register)?;
            buf.clear();
            buf.extend_from_slice(descriptor)
                .map_err(|_| PortError::Register)
        })
    }

    fn enable(&mut self) -> Result<(), PortError> {
        REBUILD.signal(());
        Ok(())
    }
}

/// Consumes assembled report maps: classifies each one, wraps it in a
/// composite descriptor, and republishes the owning unit. Installs the
/// placeholder descriptors first, which triggers the initial device
/// build.
pub async fn publisher_task() -> ! {
    let mut port = NrfUsbPort;

    {
        let mut units = UNITS.lock().await;
        if let Err(e) = units.install_defaults(&mut port) {
            warn!("USB default descriptor install failed: {}", e);
        }
    }

    loop {
        let req = PUBLISH_CH.receive().await;
        let class = detect_class(&req.map);

        let mut descriptor = CompositeDescriptor::new();
        if descriptor.insert(&req.map, class).is_err() {
            warn!("unit {} report map overflows the descriptor buffer", req.unit);
            continue;
        }

        let mut units = UNITS.lock().await;
        match units.publish(&mut port, req.unit, descriptor) {
            Ok(Some(feature)) => info!(
                "unit {} republished as touchpad ({} bytes, contact count report {})",
                req.unit,
                req.map.len(),
                feature.report_id
            ),
            Ok(None) => info!(
                "unit {} republished ({} bytes, {})",
                req.unit,
                req.map.len(),
                class
            ),
            Err(e) => warn!("unit {} republish failed: {}", req.unit, e),
        }
    }
}

/// Answers GetReport(Feature) for one unit with the synthesized
/// contact-count report; everything else falls through to the class
/// defaults. Output reports (keyboard LEDs and the like) have no
/// BLE-side consumer and are accepted and dropped.
struct ContactCountHandler {
    unit: usize,
}

impl RequestHandler for ContactCountHandler {
    fn get_report(&mut self, id: ReportId, buf: &mut [u8]) -> Option<usize> {
        let ReportId::Feature(report_id) = id else {
            return None;
        };
        // Runs inside the device task. A republish holding the lock
        // right now also re-enumerates, so rejecting the in-flight
        // query loses nothing.
        let units = UNITS.try_lock().ok()?;
        let payload = units.feature_report(self.unit, report_id)?;
        buf.get_mut(..2)?.copy_from_slice(&payload);
        Some(2)
    }

    fn set_report(&mut self, id: ReportId, data: &[u8]) -> OutResponse {
        let _ = id;
        debug!("unit {} output report ({} bytes) discarded", self.unit, data.len());
        OutResponse::Accepted
    }
}

struct UsbBusHandler;

impl embassy_usb::Handler for UsbBusHandler {
    fn configured(&mut self, configured: bool) {
        if configured {
            info!("USB device configured by host");
        }
    }

    fn suspended(&mut self, suspended: bool) {
        USB_SUSPEND_SIGNAL.signal(suspended);
    }
}

/// Runs the USB device, rebuilding it whenever the staged descriptor
/// set changes. Owns the USBD peripheral for the lifetime of the
/// firmware; each pass borrows it for one device incarnation.
pub async fn run_usb(mut usbd: peripherals::USBD, vbus: &'static SoftwareVbusDetect) -> ! {
    // The first enable arrives once the placeholder descriptors are
    // staged; attaching before that would enumerate empty interfaces.
    REBUILD.wait().await;
    info!("starting USB device");

    loop {
        let descriptors: [Vec<u8, REPORT_MAP_CAPACITY>; MAX_HID_UNITS] =
            STAGED.lock(|staged| staged.borrow().clone());

        let driver = Driver::new(&mut usbd, Irqs, vbus);

        let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
        usb_config.manufacturer = Some(config::USB_MANUFACTURER);
        usb_config.product = Some(config::USB_PRODUCT);
        usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
        usb_config.max_power = 100; // mA
        usb_config.max_packet_size_0 = 64;

        let mut config_desc = [0u8; 256];
        let mut bos_desc = [0u8; 256];
        let mut msos_desc = [0u8; 256];
        let mut ctrl_buf = [0u8; 128];
        let mut bus_handler = UsbBusHandler;

        let mut states = [State::new(), State::new(), State::new(), State::new()];
        let mut handlers = [
            ContactCountHandler { unit: 0 },
            ContactCountHandler { unit: 1 },
            ContactCountHandler { unit: 2 },
            ContactCountHandler { unit: 3 },
        ];

        let mut builder = Builder::new(
            driver,
            usb_config,
            &mut config_desc,
            &mut bos_desc,
            &mut msos_desc,
            &mut ctrl_buf,
        );
        builder.handler(&mut bus_handler);

        let [s0, s1, s2, s3] = &mut states;
        let [h0, h1, h2, h3] = &mut handlers;
        let writer0 = unit_writer(&mut builder, s0, &descriptors[0], h0);
        let writer1 = unit_writer(&mut builder, s1, &descriptors[1], h1);
        let writer2 = unit_writer(&mut builder, s2, &descriptors[2], h2);
        let writer3 = unit_writer(&mut builder, s3, &descriptors[3], h3);
        let mut writers = [writer0, writer1, writer2, writer3];

        let mut device = builder.build();

        match select3(device.run(), pump_frames(&mut writers), REBUILD.wait()).await {
            Either3::Third(()) => {
                info!("descriptor set changed - re-enumerating USB device");
            }
            // device.run and pump_frames never return.
            _ => {}
        }
        // Dropping the device detaches from the bus; the next pass
        // attaches with the new descriptor set.
    }
}

fn unit_writer<'d>(
    builder: &mut Builder<'d, UsbDriver<'d>>,
    state: &'d mut State<'d>,
    descriptor: &'d [u8],
    handler: &'d mut ContactCountHandler,
) -> UnitWriter<'d> {
    let hid_config = HidConfig {
        report_descriptor: descriptor,
        request_handler: Some(handler),
        poll_ms: config::USB_HID_POLL_MS,
        max_packet_size: config::USB_HID_PACKET_SIZE,
    };
    HidWriter::new(builder, state, hid_config)
}

/// Drains framed input reports into the interrupt endpoints for the
/// lifetime of one device incarnation.
async fn pump_frames<'d>(writers: &mut [UnitWriter<'d>; MAX_HID_UNITS]) -> ! {
    loop {
        let frame = FRAME_CH.receive().await;
        let Some(writer) = writers.get_mut(frame.unit) else {
            continue;
        };
        if writer.write(&frame.data).await.is_err() {
            warn!("unit {} USB write failed", frame.unit);
        }
    }
}

/// Logs bus suspend/resume transitions. BLE links stay up across a
/// suspend; reports queued while suspended flow again on resume.
pub async fn watch_bus() -> ! {
    loop {
        if suspend_signal().wait().await {
            info!("USB bus suspended");
        } else {
            info!("USB bus resumed");
        }
    }
}
