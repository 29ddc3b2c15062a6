//! Report Map accumulation.
//!
//! A peripheral's HID report descriptor (the Report Map characteristic)
//! is longer than one ATT exchange, so it arrives as a sequence of
//! read-response chunks. This buffer reassembles them; a zero-length
//! chunk marks the end of the read. The buffer is not reset on
//! completion or abort - whoever starts a read resets it first, so an
//! aborted earlier attempt cannot leak stale bytes into the next one.

use heapless::Vec;

use crate::config::REPORT_MAP_CAPACITY;

/// Result of feeding one read-response chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChunkOutcome {
    /// Chunk appended; more reads expected.
    Appended,
    /// Zero-length chunk: the read is complete.
    Complete,
    /// Chunk would overflow the buffer; it was dropped. The wire
    /// protocol's PDU sizing should make this unreachable, but a
    /// misbehaving peripheral must not corrupt memory.
    Overflow,
}

/// Reassembly buffer for one chunked Report Map read.
#[derive(Debug, Default)]
pub struct ReportMapBuffer {
    buf: Vec<u8, REPORT_MAP_CAPACITY>,
}

impl ReportMapBuffer {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feed one read-response chunk.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> ChunkOutcome {
        if chunk.is_empty() {
            return ChunkOutcome::Complete;
        }
        match self.buf.extend_from_slice(chunk) {
            Ok(()) => ChunkOutcome::Appended,
            Err(()) => ChunkOutcome::Overflow,
        }
    }

    /// Accumulated bytes so far.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_concatenate_in_order() {
        let mut map = ReportMapBuffer::new();
        assert_eq!(map.on_chunk(&[1, 2, 3]), ChunkOutcome::Appended);
        assert_eq!(map.on_chunk(&[4, 5]), ChunkOutcome::Appended);
        assert_eq!(map.on_chunk(&[6]), ChunkOutcome::Appended);
        assert_eq!(map.on_chunk(&[]), ChunkOutcome::Complete);
        assert_eq!(map.data(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(map.len(), 6);
    }

    #[test]
    fn immediate_terminator_yields_empty_map() {
        let mut map = ReportMapBuffer::new();
        assert_eq!(map.on_chunk(&[]), ChunkOutcome::Complete);
        assert!(map.is_empty());
    }

    #[test]
    fn oversized_chunk_is_dropped_not_appended() {
        let mut map = ReportMapBuffer::new();
        let fill = [0u8; REPORT_MAP_CAPACITY - 2];
        assert_eq!(map.on_chunk(&fill), ChunkOutcome::Appended);
        assert_eq!(map.on_chunk(&[0u8; 8]), ChunkOutcome::Overflow);
        assert_eq!(map.len(), REPORT_MAP_CAPACITY - 2);
        // The read can still terminate normally afterwards.
        assert_eq!(map.on_chunk(&[]), ChunkOutcome::Complete);
    }

    #[test]
    fn reset_discards_stale_bytes_from_an_aborted_read() {
        let mut map = ReportMapBuffer::new();
        map.on_chunk(&[0xAA, 0xBB]);
        map.reset();
        map.on_chunk(&[0xCC]);
        assert_eq!(map.data(), &[0xCC]);
    }
}
