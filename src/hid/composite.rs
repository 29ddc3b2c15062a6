//! Composite USB HID report descriptor assembly.
//!
//! A descriptor is built from tagged segments copied contiguously into
//! one shared backing buffer, in insertion order. In the common case a
//! unit's descriptor holds exactly one segment (the report map pulled
//! off a peripheral), but the layout supports concatenating several.

use heapless::Vec;

use crate::config::{MAX_SEGMENTS, REPORT_MAP_CAPACITY};
use crate::error::InsertError;
use crate::hid::items::TouchpadScan;
use crate::hid::ReportClass;

/// One tagged byte range of a composite descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Segment {
    pub class: ReportClass,
    pub len: usize,
}

/// Synthesized touchpad feature-report payload. The USB touchpad
/// class driver reads the maximum contact count with GetReport before
/// it treats an interface as a touchpad; this answers that query from
/// static state instead of round-tripping to the BLE peripheral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchpadFeature {
    pub report_id: u8,
    pub finger_count: u8,
}

impl TouchpadFeature {
    /// Wire form answered to GetReport(Feature).
    pub fn bytes(&self) -> [u8; 2] {
        [self.report_id, self.finger_count]
    }
}

/// A USB HID report descriptor assembled from tagged segments.
#[derive(Debug)]
pub struct CompositeDescriptor {
    segments: Vec<Segment, MAX_SEGMENTS>,
    bytes: Vec<u8, REPORT_MAP_CAPACITY>,
}

impl CompositeDescriptor {
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
            bytes: Vec::new(),
        }
    }

    /// Append a segment, copying `data` contiguously after all prior
    /// segments. The descriptor is left unchanged on failure.
    pub fn insert(&mut self, data: &[u8], class: ReportClass) -> Result<(), InsertError> {
        if self.segments.is_full() {
            return Err(InsertError::SegmentsFull);
        }
        self.bytes
            .extend_from_slice(data)
            .map_err(|_| InsertError::BufferOverflow)?;
        // Cannot fail: fullness checked above.
        let _ = self.segments.push(Segment {
            class,
            len: data.len(),
        });
        Ok(())
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.bytes.clear();
    }

    /// Concatenated descriptor bytes.
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment_class(&self, index: usize) -> Option<ReportClass> {
        self.segments.get(index).map(|s| s.class)
    }

    /// Scan the whole descriptor for touchpad usages. When the scan
    /// finds both a non-zero finger count and a contact-count report
    /// ID, the leading segment is retagged `Touchpad` and the
    /// synthesized feature payload is returned.
    pub fn classify(&mut self) -> Option<TouchpadFeature> {
        let scan = TouchpadScan::run(&self.bytes);
        if !scan.is_touchpad() {
            return None;
        }
        if let Some(first) = self.segments.first_mut() {
            first.class = ReportClass::Touchpad;
        }
        Some(TouchpadFeature {
            report_id: scan.contact_count_report_id,
            finger_count: scan.finger_count,
        })
    }
}

impl Default for CompositeDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal touchpad-shaped descriptor: Report ID 4, one Touch Pad
    // usage, two Finger usages, Contact Count Maximum under ID 4.
    const TOUCHPAD_DESC: &[u8] = &[
        0x05, 0x0D, // Usage Page (Digitizers)
        0x09, 0x05, // Usage (Touch Pad)
        0xA1, 0x01, // Collection (Application)
        0x85, 0x04, //   Report ID (4)
        0x09, 0x22, //   Usage (Finger)
        0x09, 0x22, //   Usage (Finger)
        0x09, 0x55, //   Usage (Contact Count Maximum)
        0xC0, // End Collection
    ];

    #[test]
    fn insert_concatenates_segments() {
        let mut desc = CompositeDescriptor::new();
        desc.insert(&[0x05, 0x01], ReportClass::Unknown).unwrap();
        desc.insert(&[0x09, 0x06, 0xC0], ReportClass::Keyboard).unwrap();
        assert_eq!(desc.size(), 5);
        assert_eq!(desc.data(), &[0x05, 0x01, 0x09, 0x06, 0xC0]);
        assert_eq!(desc.segment_count(), 2);
        assert_eq!(desc.segment_class(1), Some(ReportClass::Keyboard));
    }

    #[test]
    fn insert_into_full_segment_array_fails_cleanly() {
        let mut desc = CompositeDescriptor::new();
        for _ in 0..MAX_SEGMENTS {
            desc.insert(&[0xC0], ReportClass::Unknown).unwrap();
        }
        let before = desc.size();
        assert_eq!(
            desc.insert(&[0xC0], ReportClass::Unknown),
            Err(InsertError::SegmentsFull)
        );
        assert_eq!(desc.size(), before);
        assert_eq!(desc.segment_count(), MAX_SEGMENTS);
    }

    #[test]
    fn insert_past_buffer_capacity_fails_cleanly() {
        let mut desc = CompositeDescriptor::new();
        let big = [0u8; REPORT_MAP_CAPACITY - 4];
        desc.insert(&big, ReportClass::Unknown).unwrap();
        assert_eq!(
            desc.insert(&[0u8; 8], ReportClass::Unknown),
            Err(InsertError::BufferOverflow)
        );
        assert_eq!(desc.size(), REPORT_MAP_CAPACITY - 4);
        assert_eq!(desc.segment_count(), 1);
    }

    #[test]
    fn classify_recognizes_touchpad_and_synthesizes_feature() {
        let mut desc = CompositeDescriptor::new();
        desc.insert(TOUCHPAD_DESC, ReportClass::Unknown).unwrap();
        let feature = desc.classify().unwrap();
        assert_eq!(feature.report_id, 4);
        assert_eq!(feature.finger_count, 2);
        assert_eq!(feature.bytes(), [4, 2]);
        assert_eq!(desc.segment_class(0), Some(ReportClass::Touchpad));
    }

    #[test]
    fn classify_leaves_non_touchpad_untagged() {
        let mut desc = CompositeDescriptor::new();
        let mouse = [0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0xC0];
        desc.insert(&mouse, ReportClass::Mouse).unwrap();
        assert!(desc.classify().is_none());
        assert_eq!(desc.segment_class(0), Some(ReportClass::Mouse));
    }

    #[test]
    fn clear_resets_everything() {
        let mut desc = CompositeDescriptor::new();
        desc.insert(TOUCHPAD_DESC, ReportClass::Unknown).unwrap();
        desc.clear();
        assert_eq!(desc.size(), 0);
        assert_eq!(desc.segment_count(), 0);
        assert!(desc.data().is_empty());
    }
}
