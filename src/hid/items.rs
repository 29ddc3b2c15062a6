//! HID report descriptor item parsing.
//!
//! A report descriptor is a stream of short items, each a one-byte
//! prefix (`tag:4 | type:2 | size:2`, where size 3 encodes 4 data
//! bytes) followed by a little-endian value. This module provides the
//! item iterator plus the two whole-descriptor scans the bridge needs:
//! touchpad recognition and top-level class detection.
//!
//! ## Limitations
//!
//! Short items only; Push/Pop state and Delimiter tags are ignored.
//! That covers every report map a HID-over-GATT peripheral has been
//! seen to ship.

use crate::hid::ReportClass;

/// Item type field (bits 3:2 of the prefix).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ItemKind {
    Main,
    Global,
    Local,
    Reserved,
}

/// One decoded short item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Item {
    pub kind: ItemKind,
    /// Tag field (bits 7:4 of the prefix).
    pub tag: u8,
    /// Data bytes, zero-extended little-endian.
    pub value: u32,
}

// Tags this crate interprets (within their item kind).
pub const MAIN_COLLECTION: u8 = 0x0A;
pub const GLOBAL_USAGE_PAGE: u8 = 0x00;
pub const GLOBAL_REPORT_ID: u8 = 0x08;
pub const LOCAL_USAGE: u8 = 0x00;

// Usages the touchpad scan recognizes (Digitizers page).
const USAGE_TOUCH_PAD: u32 = 0x05;
const USAGE_FINGER: u32 = 0x22;
const USAGE_CONTACT_COUNT_MAX: u32 = 0x55;

// Top-level application usages for class detection.
const PAGE_GENERIC_DESKTOP: u32 = 0x01;
const PAGE_KEYBOARD: u32 = 0x07;
const USAGE_MOUSE: u32 = 0x02;
const USAGE_KEYBOARD: u32 = 0x06;
const COLLECTION_APPLICATION: u32 = 0x01;

/// Iterator over the short items of a report descriptor. Stops at the
/// first item whose declared data runs past the end of the buffer.
pub struct Items<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Items<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let prefix = self.data[self.pos];
        let size = match prefix & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        if self.pos + 1 + size > self.data.len() {
            return None;
        }
        let mut value: u32 = 0;
        for (i, &b) in self.data[self.pos + 1..self.pos + 1 + size].iter().enumerate() {
            value |= (b as u32) << (8 * i);
        }
        let kind = match (prefix >> 2) & 0x03 {
            0 => ItemKind::Main,
            1 => ItemKind::Global,
            2 => ItemKind::Local,
            _ => ItemKind::Reserved,
        };
        self.pos += 1 + size;
        Some(Item {
            kind,
            tag: (prefix >> 4) & 0x0F,
            value,
        })
    }
}

/// Result of scanning a descriptor for Windows Precision Touchpad
/// usages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchpadScan {
    /// Number of Finger usages since the last Touch Pad usage.
    pub finger_count: u8,
    /// Report ID in effect when the Contact Count Maximum usage
    /// appeared, 0 if it never did.
    pub contact_count_report_id: u8,
}

impl TouchpadScan {
    /// Walk the descriptor tracking the current Report ID: a Touch Pad
    /// usage (0x05) resets the finger counter, each Finger usage
    /// (0x22) increments it, and a Contact Count Maximum usage (0x55)
    /// records the Report ID it appeared under.
    pub fn run(descriptor: &[u8]) -> Self {
        let mut scan = TouchpadScan::default();
        let mut report_id: u8 = 0;
        for item in Items::new(descriptor) {
            match (item.kind, item.tag) {
                (ItemKind::Global, GLOBAL_REPORT_ID) => report_id = item.value as u8,
                (ItemKind::Local, LOCAL_USAGE) => match item.value {
                    USAGE_TOUCH_PAD => scan.finger_count = 0,
                    USAGE_FINGER => scan.finger_count = scan.finger_count.saturating_add(1),
                    USAGE_CONTACT_COUNT_MAX => scan.contact_count_report_id = report_id,
                    _ => {}
                },
                _ => {}
            }
        }
        scan
    }

    /// A descriptor is a touchpad when the scan found at least one
    /// finger and a contact-count report ID.
    pub fn is_touchpad(&self) -> bool {
        self.finger_count > 0 && self.contact_count_report_id != 0
    }
}

/// Detect the class of a descriptor from its first top-level
/// application collection: Generic Desktop / Keyboard is a keyboard,
/// Generic Desktop / Mouse is a mouse, anything else is Unknown.
/// (Touchpads are recognized separately via [`TouchpadScan`], which
/// needs the finger count anyway.)
pub fn detect_class(descriptor: &[u8]) -> ReportClass {
    let mut usage_page: u32 = 0;
    let mut usage: u32 = 0;
    for item in Items::new(descriptor) {
        match (item.kind, item.tag) {
            (ItemKind::Global, GLOBAL_USAGE_PAGE) => usage_page = item.value,
            (ItemKind::Local, LOCAL_USAGE) => usage = item.value,
            (ItemKind::Main, MAIN_COLLECTION) if item.value == COLLECTION_APPLICATION => {
                return match (usage_page, usage) {
                    (PAGE_GENERIC_DESKTOP, USAGE_KEYBOARD) => ReportClass::Keyboard,
                    (PAGE_KEYBOARD, _) => ReportClass::Keyboard,
                    (PAGE_GENERIC_DESKTOP, USAGE_MOUSE) => ReportClass::Mouse,
                    _ => ReportClass::Unknown,
                };
            }
            _ => {}
        }
    }
    ReportClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_item_sizes() {
        // Usage Page (1 byte), Logical Maximum (2 bytes), a 4-byte
        // Unit item, and End Collection (0 bytes).
        let desc = [
            0x05, 0x0D, // Usage Page (Digitizers)
            0x26, 0xFF, 0x7F, // Logical Maximum (32767)
            0x67, 0x11, 0x22, 0x33, 0x44, // Unit (4-byte data)
            0xC0, // End Collection
        ];
        let items: heapless::Vec<Item, 8> = Items::new(&desc).collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].value, 0x0D);
        assert_eq!(items[1].value, 0x7FFF);
        assert_eq!(items[2].value, 0x44332211);
        assert_eq!(items[3].kind, ItemKind::Main);
        assert_eq!(items[3].value, 0);
    }

    #[test]
    fn stops_at_truncated_item() {
        // Second item claims 2 data bytes but only 1 remains.
        let desc = [0x05, 0x0D, 0x26, 0xFF];
        assert_eq!(Items::new(&desc).count(), 1);
    }

    #[test]
    fn touchpad_scan_counts_fingers_and_contact_id() {
        let desc = [
            0x05, 0x0D, // Usage Page (Digitizers)
            0x09, 0x05, // Usage (Touch Pad)
            0xA1, 0x01, // Collection (Application)
            0x85, 0x04, //   Report ID (4)
            0x09, 0x22, //   Usage (Finger)
            0x09, 0x22, //   Usage (Finger)
            0x09, 0x55, //   Usage (Contact Count Maximum)
            0xC0, // End Collection
        ];
        let scan = TouchpadScan::run(&desc);
        assert_eq!(scan.finger_count, 2);
        assert_eq!(scan.contact_count_report_id, 4);
        assert!(scan.is_touchpad());
    }

    #[test]
    fn touch_pad_usage_resets_finger_count() {
        let desc = [
            0x09, 0x22, // Usage (Finger) - before any Touch Pad usage
            0x09, 0x05, // Usage (Touch Pad) - resets
            0x85, 0x07, // Report ID (7)
            0x09, 0x22, // Usage (Finger)
            0x09, 0x55, // Usage (Contact Count Maximum)
        ];
        let scan = TouchpadScan::run(&desc);
        assert_eq!(scan.finger_count, 1);
        assert_eq!(scan.contact_count_report_id, 7);
    }

    #[test]
    fn fingers_without_contact_count_are_not_a_touchpad() {
        let desc = [0x09, 0x05, 0x09, 0x22, 0x09, 0x22];
        let scan = TouchpadScan::run(&desc);
        assert_eq!(scan.finger_count, 2);
        assert!(!scan.is_touchpad());
    }

    #[test]
    fn detects_keyboard_application() {
        let desc = [
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x09, 0x06, // Usage (Keyboard)
            0xA1, 0x01, // Collection (Application)
            0xC0,
        ];
        assert_eq!(detect_class(&desc), ReportClass::Keyboard);
    }

    #[test]
    fn detects_mouse_application() {
        let desc = [
            0x05, 0x01, // Usage Page (Generic Desktop)
            0x09, 0x02, // Usage (Mouse)
            0xA1, 0x01, // Collection (Application)
            0xC0,
        ];
        assert_eq!(detect_class(&desc), ReportClass::Mouse);
    }

    #[test]
    fn vendor_collection_is_unknown() {
        let desc = [
            0x06, 0x00, 0xFF, // Usage Page (Vendor 0xFF00)
            0x09, 0x01, // Usage (1)
            0xA1, 0x01, // Collection (Application)
            0xC0,
        ];
        assert_eq!(detect_class(&desc), ReportClass::Unknown);
    }

    #[test]
    fn empty_descriptor_is_unknown() {
        assert_eq!(detect_class(&[]), ReportClass::Unknown);
        assert!(!TouchpadScan::run(&[]).is_touchpad());
    }
}
