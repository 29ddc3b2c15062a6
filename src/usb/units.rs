//! HID interface unit pool and the re-enumeration sequence.
//!
//! `publish` is the dominant cost and risk point of the USB side:
//! replacing one descriptor means detaching the whole device,
//! re-registering every unit, and re-attaching, because the composite
//! device's interface set is frozen when it attaches. Callers must
//! serialize publishes - on the device the set lives behind a single
//! async mutex, and `&mut self` enforces the same exclusivity here.

use crate::config::MAX_HID_UNITS;
use crate::error::PublishError;
use crate::hid::serial::CUSTOM_SERIAL_DESCRIPTOR;
use crate::hid::{CompositeDescriptor, ReportClass, TouchpadFeature};
use crate::usb::UsbHidPort;

/// One published USB HID interface.
#[derive(Debug)]
pub struct HidUnit {
    descriptor: CompositeDescriptor,
    /// Synthesized touchpad feature, when the current descriptor
    /// classified as one.
    feature: Option<TouchpadFeature>,
    /// Whether this unit has ever been registered with the platform.
    active: bool,
}

impl HidUnit {
    const fn new() -> Self {
        Self {
            descriptor: CompositeDescriptor::new(),
            feature: None,
            active: false,
        }
    }

    pub fn descriptor(&self) -> &CompositeDescriptor {
        &self.descriptor
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// The fixed set of HID interface units presented to the USB host.
pub struct HidUnitSet {
    units: [HidUnit; MAX_HID_UNITS],
}

impl HidUnitSet {
    pub const fn new() -> Self {
        Self {
            units: [const { HidUnit::new() }; MAX_HID_UNITS],
        }
    }

    /// Boot path: give every unit the placeholder serial descriptor,
    /// register them all, then attach the device once. No detach is
    /// needed because nothing has attached yet.
    pub fn install_defaults(&mut self, port: &mut impl UsbHidPort) -> Result<(), PublishError> {
        for (i, unit) in self.units.iter_mut().enumerate() {
            unit.descriptor.clear();
            // Cannot fail: placeholder is far below buffer capacity.
            let _ = unit
                .descriptor
                .insert(CUSTOM_SERIAL_DESCRIPTOR, ReportClass::CustomSerial);
            unit.feature = None;
            port.register(i, unit.descriptor.data())?;
            unit.active = true;
        }
        port.enable()?;
        Ok(())
    }

    /// Replace one unit's descriptor and republish. An inactive unit
    /// registers directly; once the unit is live the whole device
    /// detaches, every unit re-registers (not just the changed one),
    /// and the device re-attaches. A mid-sequence failure propagates
    /// and leaves interfaces unregistered until the next successful
    /// publish - logged by the caller, not fatal.
    ///
    /// Returns the synthesized touchpad feature when the descriptor
    /// classified as a touchpad.
    pub fn publish(
        &mut self,
        port: &mut impl UsbHidPort,
        unit: usize,
        mut descriptor: CompositeDescriptor,
    ) -> Result<Option<TouchpadFeature>, PublishError> {
        if unit >= self.units.len() {
            return Err(PublishError::UnitOutOfRange);
        }
        let feature = descriptor.classify();
        self.units[unit].descriptor = descriptor;
        self.units[unit].feature = feature;

        if !self.units[unit].active {
            port.register(unit, self.units[unit].descriptor.data())?;
            self.units[unit].active = true;
            return Ok(feature);
        }

        port.disable()?;
        for (i, u) in self.units.iter().enumerate() {
            port.register(i, u.descriptor.data())?;
        }
        port.enable()?;
        Ok(feature)
    }

    /// Answer a GetReport(Feature) query: yields the 2-byte
    /// `{report ID, max contact count}` payload when `unit` currently
    /// publishes a touchpad and the queried ID matches its
    /// contact-count report.
    pub fn feature_report(&self, unit: usize, report_id: u8) -> Option<[u8; 2]> {
        let u = self.units.get(unit)?;
        let feature = u.feature?;
        if u.descriptor.segment_class(0) == Some(ReportClass::Touchpad)
            && feature.report_id == report_id
        {
            Some(feature.bytes())
        } else {
            None
        }
    }

    pub fn unit(&self, unit: usize) -> Option<&HidUnit> {
        self.units.get(unit)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Default for HidUnitSet {
    fn default() -> Self {
        Self::new()
    }
}
