//! Reassembly of GATT stream notifications into fixed-size frames.

use hpy_protocol::command_id::FRAME_SIZE;
use hpy_protocol::response::parse_batch_crc;
use hpy_protocol::{ChecksumAccumulator, Crc32};

/// Outcome of one GATT batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub frames_received: u32,
    pub crc_valid: bool,
}

/// Collects notification payloads into [`FRAME_SIZE`] frames and keeps a
/// running checksum over every completed frame of the current batch.
///
/// A trailing partial frame is never checksummed, so a batch that ends
/// mid-frame fails validation.
#[derive(Debug)]
pub struct GattFrameAccumulator<C: ChecksumAccumulator = Crc32> {
    buffer: Vec<u8>,
    frames_received: u32,
    crc: C,
}

impl<C: ChecksumAccumulator> Default for GattFrameAccumulator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ChecksumAccumulator> GattFrameAccumulator<C> {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_SIZE),
            frames_received: 0,
            crc: C::default(),
        }
    }

    /// Start a new batch.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.frames_received = 0;
        self.crc.reset();
    }

    /// Feed one notification. Returns the frames it completed, in order.
    pub fn push(&mut self, mut data: &[u8]) -> Vec<Vec<u8>> {
        let mut completed = Vec::new();
        while !data.is_empty() {
            let take = data.len().min(FRAME_SIZE - self.buffer.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.buffer.len() == FRAME_SIZE {
                self.crc.update(&self.buffer);
                self.frames_received += 1;
                let frame = std::mem::replace(&mut self.buffer, Vec::with_capacity(FRAME_SIZE));
                completed.push(frame);
            }
        }
        completed
    }

    pub fn frames_received(&self) -> u32 {
        self.frames_received
    }

    /// Check the batch against the device's terminal response
    /// `[0x17, crc32 LE, status]`. A short response is a failed batch.
    pub fn validate(&self, response: &[u8]) -> BatchResult {
        let crc_valid = match parse_batch_crc(response) {
            Ok(device_crc) => device_crc == self.crc.finalize(),
            Err(_) => false,
        };
        BatchResult {
            frames_received: self.frames_received,
            crc_valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpy_protocol::command_id::GET_FRAMES;

    fn frame(fill: u8) -> Vec<u8> {
        vec![fill; FRAME_SIZE]
    }

    fn crc_response(crc: u32) -> Vec<u8> {
        let mut response = vec![GET_FRAMES];
        response.extend_from_slice(&crc.to_le_bytes());
        response.push(0);
        response
    }

    #[test]
    fn test_frames_split_across_notifications() {
        let mut acc: GattFrameAccumulator = GattFrameAccumulator::new();
        let stream: Vec<u8> = [frame(1), frame(2)].concat();

        let mut frames = Vec::new();
        for chunk in stream.chunks(244) {
            frames.extend(acc.push(chunk));
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frame(1));
        assert_eq!(frames[1], frame(2));
        assert_eq!(acc.frames_received(), 2);

        let result = acc.validate(&crc_response(Crc32::checksum(&stream)));
        assert_eq!(
            result,
            BatchResult {
                frames_received: 2,
                crc_valid: true
            }
        );
    }

    #[test]
    fn test_partial_frame_excluded_from_crc() {
        let mut acc: GattFrameAccumulator = GattFrameAccumulator::new();
        acc.push(&frame(7));
        acc.push(&[7u8; 100]);
        assert_eq!(acc.frames_received(), 1);
        assert!(acc.validate(&crc_response(Crc32::checksum(&frame(7)))).crc_valid);
    }

    #[test]
    fn test_wrong_or_short_crc_is_invalid() {
        let mut acc: GattFrameAccumulator = GattFrameAccumulator::new();
        acc.push(&frame(3));
        assert!(!acc.validate(&crc_response(0xDEAD_BEEF)).crc_valid);
        assert!(!acc.validate(&[GET_FRAMES, 0x01]).crc_valid);
    }

    #[test]
    fn test_reset_starts_new_batch() {
        let mut acc: GattFrameAccumulator = GattFrameAccumulator::new();
        acc.push(&frame(1));
        acc.push(&[0u8; 10]);
        acc.reset();
        assert_eq!(acc.frames_received(), 0);
        let frames = acc.push(&frame(9));
        assert_eq!(frames, vec![frame(9)]);
        assert!(acc.validate(&crc_response(Crc32::checksum(&frame(9)))).crc_valid);
    }
}
