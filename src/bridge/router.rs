//! Notification framing.
//!
//! Every GATT notification becomes exactly one frame handed to the
//! slot's sink, preserving delivery order - no buffering, no
//! reordering. A notification from a characteristic with a known
//! report ID is prefixed with that ID; an unmapped one passes through
//! unmodified. Frames are capped at [`MAX_FRAME_LEN`] bytes; payload
//! beyond the cap is silently dropped (an accepted lossy edge, the
//! transport MTU makes it unreachable in practice).

use heapless::Vec;

use crate::config::MAX_FRAME_LEN;

/// One framed input report on its way to a USB endpoint.
pub type InputFrame = Vec<u8, MAX_FRAME_LEN>;

/// Build the outbound frame for one notification. Returns `None` for
/// an empty payload (explicitly a no-op, not an empty frame).
pub fn frame_notification(report_id: Option<u8>, payload: &[u8]) -> Option<InputFrame> {
    if payload.is_empty() {
        return None;
    }
    let mut frame = InputFrame::new();
    if let Some(id) = report_id {
        // Capacity is at least 1.
        let _ = frame.push(id);
    }
    let room = frame.capacity() - frame.len();
    let take = payload.len().min(room);
    let _ = frame.extend_from_slice(&payload[..take]);
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_handle_prefixes_report_id() {
        let frame = frame_notification(Some(0x02), &[10, 20, 30]).unwrap();
        assert_eq!(frame.as_slice(), &[0x02, 10, 20, 30]);
    }

    #[test]
    fn unmapped_handle_passes_payload_through() {
        let frame = frame_notification(None, &[10, 20, 30]).unwrap();
        assert_eq!(frame.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn empty_payload_is_a_no_op() {
        assert!(frame_notification(Some(0x02), &[]).is_none());
        assert!(frame_notification(None, &[]).is_none());
    }

    #[test]
    fn oversized_mapped_payload_truncates_to_frame_limit() {
        let payload = [0xAB; MAX_FRAME_LEN + 50];
        let frame = frame_notification(Some(0x07), &payload).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        assert_eq!(frame[0], 0x07);
        // Exactly MAX_FRAME_LEN - 1 payload bytes survive.
        assert!(frame[1..].iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn oversized_unmapped_payload_truncates_to_frame_limit() {
        let payload = [0xCD; MAX_FRAME_LEN + 1];
        let frame = frame_notification(None, &payload).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);
    }

    #[test]
    fn maximal_fitting_payload_is_not_truncated() {
        let payload = [0x11; MAX_FRAME_LEN - 1];
        let frame = frame_notification(Some(0x01), &payload).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);
        assert_eq!(frame[0], 0x01);
    }
}
