//! HID report descriptor domain.
//!
//! The bridge never interprets report *contents* - peripherals' report
//! maps are republished verbatim and input reports pass through as
//! opaque bytes. What it does interpret is the descriptors themselves:
//! enough item-level parsing to classify a map (keyboard, mouse,
//! touchpad) and to synthesize the contact-count feature report a
//! touchpad needs before the USB host will enumerate it as one.

pub mod composite;
pub mod items;
pub mod serial;

pub use composite::{CompositeDescriptor, TouchpadFeature};

/// Semantic class of one descriptor segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportClass {
    Keyboard,
    Mouse,
    Touchpad,
    /// Vendor-defined serial channel (the boot-time placeholder
    /// descriptor every unit starts with).
    CustomSerial,
    #[default]
    Unknown,
}
