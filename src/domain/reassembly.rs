//! Notification Reassembly
//!
//! Rebuilds frames from the peripheral's notification stream.
//!
//! ```text
//! len == chunk_size        -> image chunk, appended in arrival order
//! len == 1, termination    -> cut the image short at truncated_len
//! len == 1, other digit    -> local inference status ("1" = detected)
//! anything else            -> passed through as an unknown payload
//! ```

use crate::domain::models::Frame;
use crate::domain::settings::FrameProtocol;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Recoverable framing irregularities. Never propagated; the buffer is reset instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolAnomaly {
    #[error("chunk count reached {chunks} but {bytes} bytes accumulated (expected {expected})")]
    LengthMismatch {
        chunks: usize,
        bytes: usize,
        expected: usize,
    },
    #[error("termination after {accumulated} bytes, below the {required} byte threshold")]
    EarlyTermination { accumulated: usize, required: usize },
}

/// Image bytes collected since the last reset.
///
/// Chunks are only appended whole, so `len() == chunks_received() * chunk_size`.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    accumulated: Vec<u8>,
    chunks_received: usize,
}

impl ReassemblyBuffer {
    fn append(&mut self, chunk: &[u8]) {
        self.accumulated.extend_from_slice(chunk);
        self.chunks_received += 1;
    }

    /// Hand out the accumulated bytes and start over
    fn take(&mut self) -> Vec<u8> {
        self.chunks_received = 0;
        std::mem::take(&mut self.accumulated)
    }

    fn reset(&mut self) {
        self.accumulated.clear();
        self.chunks_received = 0;
    }

    pub fn len(&self) -> usize {
        self.accumulated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.is_empty()
    }

    pub fn chunks_received(&self) -> usize {
        self.chunks_received
    }
}

pub struct FrameReassembler {
    protocol: FrameProtocol,
    buffer: ReassemblyBuffer,
    last_anomaly: Option<ProtocolAnomaly>,
}

impl FrameReassembler {
    pub fn new(protocol: FrameProtocol) -> Self {
        Self {
            protocol,
            buffer: ReassemblyBuffer::default(),
            last_anomaly: None,
        }
    }

    /// Feed one notification payload, returning a frame once one is complete
    pub fn ingest(&mut self, notification: &[u8]) -> Option<Frame> {
        if notification.len() == self.protocol.chunk_size {
            return self.append_chunk(notification);
        }

        if let [byte] = notification {
            if char::from(*byte) == self.protocol.termination_digit {
                return self.terminate();
            }
            if byte.is_ascii_digit() {
                return Some(Frame::Status {
                    detected: *byte == b'1',
                });
            }
        }

        Some(Frame::Unknown {
            raw: notification.to_vec(),
        })
    }

    fn append_chunk(&mut self, chunk: &[u8]) -> Option<Frame> {
        self.buffer.append(chunk);
        trace!(
            "Chunk {}/{} appended ({} bytes)",
            self.buffer.chunks_received(),
            self.protocol.chunk_count,
            self.buffer.len()
        );

        if self.buffer.chunks_received() < self.protocol.chunk_count {
            return None;
        }

        let expected = self.protocol.total_size();
        if self.buffer.len() != expected {
            self.record(ProtocolAnomaly::LengthMismatch {
                chunks: self.buffer.chunks_received(),
                bytes: self.buffer.len(),
                expected,
            });
            self.buffer.reset();
            return None;
        }

        let bytes = self.buffer.take();
        debug!("Image complete: {} bytes", bytes.len());
        Some(Frame::Image { bytes })
    }

    fn terminate(&mut self) -> Option<Frame> {
        let accumulated = self.buffer.len();
        let required = self.protocol.truncated_len;

        if accumulated < required {
            self.record(ProtocolAnomaly::EarlyTermination {
                accumulated,
                required,
            });
            self.buffer.reset();
            return None;
        }

        let mut bytes = self.buffer.take();
        bytes.truncate(required);
        debug!(
            "Image terminated early: kept {} of {} bytes",
            required, accumulated
        );
        Some(Frame::TruncatedImage { bytes })
    }

    fn record(&mut self, anomaly: ProtocolAnomaly) {
        match &anomaly {
            ProtocolAnomaly::LengthMismatch { .. } => warn!("Protocol anomaly: {}", anomaly),
            ProtocolAnomaly::EarlyTermination { .. } => debug!("Discarding image: {}", anomaly),
        }
        self.last_anomaly = Some(anomaly);
    }

    /// Clear all progress, e.g. on a fresh connection
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Drop a partially received image after the link was torn down
    pub fn abandon(&mut self) {
        if !self.buffer.is_empty() {
            debug!(
                "Abandoning partial image: {} chunks, {} bytes",
                self.buffer.chunks_received(),
                self.buffer.len()
            );
        }
        self.buffer.reset();
    }

    pub fn buffer(&self) -> &ReassemblyBuffer {
        &self.buffer
    }

    pub fn last_anomaly(&self) -> Option<&ProtocolAnomaly> {
        self.last_anomaly.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seed: u8) -> Vec<u8> {
        (0..220u32).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    fn feed(reassembler: &mut FrameReassembler, count: usize) -> (Vec<u8>, Vec<Frame>) {
        let mut sent = Vec::new();
        let mut frames = Vec::new();
        for i in 0..count {
            let c = chunk(i as u8 * 17);
            sent.extend_from_slice(&c);
            frames.extend(reassembler.ingest(&c));
        }
        (sent, frames)
    }

    #[test]
    fn test_full_image() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        let (sent, frames) = feed(&mut reassembler, 14);

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Image { bytes } => {
                assert_eq!(bytes.len(), 3080);
                assert_eq!(bytes, &sent);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(reassembler.buffer().is_empty());
        assert_eq!(reassembler.buffer().chunks_received(), 0);
    }

    #[test]
    fn test_partial_image_emits_nothing() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        let (_, frames) = feed(&mut reassembler, 13);

        assert!(frames.is_empty());
        assert_eq!(reassembler.buffer().chunks_received(), 13);
        assert_eq!(reassembler.buffer().len(), 13 * 220);
    }

    #[test]
    fn test_termination_after_thirteen_chunks() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        let (sent, _) = feed(&mut reassembler, 13);

        let frame = reassembler.ingest(b"7");
        assert_eq!(
            frame,
            Some(Frame::TruncatedImage {
                bytes: sent[..2056].to_vec()
            })
        );
        assert!(reassembler.buffer().is_empty());
        assert_eq!(reassembler.buffer().chunks_received(), 0);
    }

    #[test]
    fn test_termination_at_exact_threshold() {
        let protocol = FrameProtocol {
            chunk_size: 4,
            chunk_count: 8,
            truncated_len: 12,
            termination_digit: '7',
        };
        let mut reassembler = FrameReassembler::new(protocol);
        for c in [[1u8, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]] {
            assert_eq!(reassembler.ingest(&c), None);
        }

        let frame = reassembler.ingest(b"7");
        assert_eq!(
            frame,
            Some(Frame::TruncatedImage {
                bytes: (1..=12).collect()
            })
        );
    }

    #[test]
    fn test_termination_below_threshold_resets() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        feed(&mut reassembler, 9); // 1980 bytes

        assert_eq!(reassembler.ingest(b"7"), None);
        assert!(reassembler.buffer().is_empty());
        assert_eq!(reassembler.buffer().chunks_received(), 0);
        assert_eq!(
            reassembler.last_anomaly(),
            Some(&ProtocolAnomaly::EarlyTermination {
                accumulated: 1980,
                required: 2056
            })
        );
    }

    #[test]
    fn test_termination_on_empty_buffer() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        assert_eq!(reassembler.ingest(b"7"), None);
        assert!(reassembler.buffer().is_empty());
    }

    #[test]
    fn test_status_digits() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        assert_eq!(
            reassembler.ingest(b"1"),
            Some(Frame::Status { detected: true })
        );
        assert_eq!(
            reassembler.ingest(b"0"),
            Some(Frame::Status { detected: false })
        );
        assert_eq!(
            reassembler.ingest(b"9"),
            Some(Frame::Status { detected: false })
        );
    }

    #[test]
    fn test_status_leaves_image_untouched() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        let (first, _) = feed(&mut reassembler, 5);

        assert_eq!(
            reassembler.ingest(b"1"),
            Some(Frame::Status { detected: true })
        );
        assert_eq!(
            reassembler.ingest(b"0"),
            Some(Frame::Status { detected: false })
        );
        assert_eq!(reassembler.buffer().chunks_received(), 5);
        assert_eq!(reassembler.buffer().len(), 1100);

        let mut rest = Vec::new();
        let mut frames = Vec::new();
        for i in 5..14u8 {
            let c = chunk(i * 17);
            rest.extend_from_slice(&c);
            frames.extend(reassembler.ingest(&c));
        }
        let mut expected = first;
        expected.extend(rest);
        assert_eq!(frames, vec![Frame::Image { bytes: expected }]);
    }

    #[test]
    fn test_unknown_payloads() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        feed(&mut reassembler, 2);

        assert_eq!(
            reassembler.ingest(b"x"),
            Some(Frame::Unknown { raw: b"x".to_vec() })
        );
        assert_eq!(
            reassembler.ingest(b"hello"),
            Some(Frame::Unknown {
                raw: b"hello".to_vec()
            })
        );
        assert_eq!(
            reassembler.ingest(&[0u8; 219]),
            Some(Frame::Unknown { raw: vec![0; 219] })
        );
        assert_eq!(
            reassembler.ingest(&[]),
            Some(Frame::Unknown { raw: Vec::new() })
        );
        assert_eq!(reassembler.buffer().chunks_received(), 2);
    }

    #[test]
    fn test_reset_after_image_is_fresh_start() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        feed(&mut reassembler, 14);

        let (sent, frames) = feed(&mut reassembler, 14);
        assert_eq!(frames, vec![Frame::Image { bytes: sent }]);
    }

    #[test]
    fn test_reset_after_truncation_is_fresh_start() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        feed(&mut reassembler, 12);
        assert!(reassembler.ingest(b"7").is_some());

        assert_eq!(reassembler.ingest(&chunk(3)), None);
        assert_eq!(reassembler.buffer().chunks_received(), 1);
        assert_eq!(reassembler.buffer().len(), 220);
    }

    #[test]
    fn test_abandon_discards_partial_image() {
        let mut reassembler = FrameReassembler::new(FrameProtocol::default());
        feed(&mut reassembler, 5);
        reassembler.abandon();

        let (sent, frames) = feed(&mut reassembler, 14);
        assert_eq!(frames, vec![Frame::Image { bytes: sent }]);
    }

    #[test]
    fn test_custom_termination_digit() {
        let protocol = FrameProtocol {
            termination_digit: '9',
            ..FrameProtocol::default()
        };
        let mut reassembler = FrameReassembler::new(protocol);
        assert_eq!(
            reassembler.ingest(b"7"),
            Some(Frame::Status { detected: false })
        );
        assert_eq!(reassembler.ingest(b"9"), None);
    }
}
