//! BLE advertising payload parsing.
//!
//! Advertising data is a sequence of AD structures, each laid out as
//! `[length, type, payload...]` where `length` counts the type byte
//! plus the payload. The scanner needs exactly two lookups from a raw
//! payload: does this peripheral advertise the HID service, and what
//! is its local name.

use heapless::String;

use crate::ble::HID_SERVICE_UUID;

// AD types (Bluetooth Core Specification Supplement, Part A).
const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_NAME_SHORTENED: u8 = 0x08;
const AD_NAME_COMPLETE: u8 = 0x09;

/// Iterator over the AD structures of a raw advertising payload.
/// Stops at the first zero-length or truncated structure.
struct AdStructures<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdStructures<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let len = self.data[self.pos] as usize;
        if len == 0 || self.pos + len >= self.data.len() {
            return None;
        }
        let ad_type = self.data[self.pos + 1];
        let payload = &self.data[self.pos + 2..self.pos + 1 + len];
        self.pos += len + 1;
        Some((ad_type, payload))
    }
}

/// Check whether the payload lists the HID service UUID (0x1812) in a
/// complete or incomplete 16-bit service UUID structure.
pub fn contains_hid_service_uuid(data: &[u8]) -> bool {
    let hid_uuid_le = HID_SERVICE_UUID.to_le_bytes();
    AdStructures::new(data).any(|(ad_type, payload)| {
        (ad_type == AD_UUID16_INCOMPLETE || ad_type == AD_UUID16_COMPLETE)
            && payload.chunks_exact(2).any(|chunk| chunk == hid_uuid_le)
    })
}

/// Extract the complete or shortened local name, if the peripheral
/// advertises one. Names longer than 32 bytes are truncated.
pub fn extract_device_name(data: &[u8]) -> Option<String<32>> {
    AdStructures::new(data).find_map(|(ad_type, payload)| {
        if ad_type != AD_NAME_SHORTENED && ad_type != AD_NAME_COMPLETE {
            return None;
        }
        let mut name = String::new();
        for &b in payload {
            if name.push(b as char).is_err() {
                break;
            }
        }
        Some(name)
    })
}
