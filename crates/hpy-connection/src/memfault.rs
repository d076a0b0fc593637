// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Crash-log ring buffer.
//!
//! Chunks drained from the ring's Memfault file are copied into a fixed byte
//! ring and described by [`MemfaultChunkDescriptor`]s. The buffer belongs to
//! a connection slot and survives its reconnects; a write that reuses bytes
//! of an older chunk drops that chunk's descriptor.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemfaultChunkDescriptor {
    /// Connection session the chunk was drained in.
    pub connect_seq: u16,
    pub offset: usize,
    pub length: usize,
    pub crc_valid: bool,
}

#[derive(Debug)]
pub struct MemfaultBuffer {
    data: Vec<u8>,
    write_offset: usize,
    max_descriptors: usize,
    /// Live descriptors, oldest first, with their uploaded flag.
    chunks: VecDeque<(MemfaultChunkDescriptor, bool)>,
    connect_seq: u16,
}

impl MemfaultBuffer {
    pub fn new(capacity: usize, max_descriptors: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)],
            write_offset: 0,
            max_descriptors: max_descriptors.max(1),
            chunks: VecDeque::with_capacity(max_descriptors),
            connect_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn connect_seq(&self) -> u16 {
        self.connect_seq
    }

    /// Called once per fresh connection session.
    pub fn increment_connect_seq(&mut self) {
        self.connect_seq = self.connect_seq.wrapping_add(1);
    }

    pub fn can_fit_chunk(&self, length: usize) -> bool {
        length <= self.capacity()
    }

    /// Store a chunk. Returns `None` for empty or oversized data.
    pub fn write_chunk(&mut self, data: &[u8], crc_valid: bool) -> Option<MemfaultChunkDescriptor> {
        if data.is_empty() || !self.can_fit_chunk(data.len()) {
            return None;
        }

        let capacity = self.capacity();
        let start = self.write_offset;
        let end = start + data.len();
        self.chunks.retain(|(chunk, _)| {
            !ranges_overlap(capacity, start, end, chunk.offset, chunk.offset + chunk.length)
        });

        while self.chunks.len() >= self.max_descriptors {
            self.chunks.pop_front();
        }

        let first = data.len().min(capacity - start);
        self.data[start..start + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            self.data[..data.len() - first].copy_from_slice(&data[first..]);
        }

        let chunk = MemfaultChunkDescriptor {
            connect_seq: self.connect_seq,
            offset: start,
            length: data.len(),
            crc_valid,
        };
        self.chunks.push_back((chunk, false));
        self.write_offset = end % capacity;
        Some(chunk)
    }

    pub fn chunks(&self) -> Vec<MemfaultChunkDescriptor> {
        self.chunks.iter().map(|(chunk, _)| *chunk).collect()
    }

    pub fn unuploaded_chunks(&self) -> Vec<MemfaultChunkDescriptor> {
        self.chunks
            .iter()
            .filter(|(_, uploaded)| !uploaded)
            .map(|(chunk, _)| *chunk)
            .collect()
    }

    pub fn mark_uploaded(&mut self, descriptors: &[MemfaultChunkDescriptor]) {
        for (chunk, uploaded) in self.chunks.iter_mut() {
            if descriptors.contains(chunk) {
                *uploaded = true;
            }
        }
    }

    /// Copy a chunk's bytes out of the ring.
    pub fn read_chunk_data(&self, chunk: &MemfaultChunkDescriptor) -> Vec<u8> {
        let capacity = self.capacity();
        let length = chunk.length.min(capacity);
        let offset = chunk.offset % capacity;
        let first = length.min(capacity - offset);
        let mut out = Vec::with_capacity(length);
        out.extend_from_slice(&self.data[offset..offset + first]);
        out.extend_from_slice(&self.data[..length - first]);
        out
    }
}

/// Overlap of `[a_start, a_end)` and `[b_start, b_end)` where an end past
/// `capacity` wraps to the front of the ring.
fn ranges_overlap(capacity: usize, a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> bool {
    let a_wraps = a_end > capacity;
    let b_wraps = b_end > capacity;
    match (a_wraps, b_wraps) {
        (false, false) => a_start < b_end && b_start < a_end,
        (true, false) => b_start < a_end % capacity || b_end > a_start,
        (false, true) => a_start < b_end % capacity || a_end > b_start,
        (true, true) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let mut buf = MemfaultBuffer::new(64, 16);
        buf.increment_connect_seq();
        let chunk = buf.write_chunk(&[1, 2, 3, 4], true).unwrap();
        assert_eq!(chunk.connect_seq, 1);
        assert_eq!(chunk.offset, 0);
        assert_eq!(buf.read_chunk_data(&chunk), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let mut buf = MemfaultBuffer::new(16, 16);
        assert!(buf.write_chunk(&[], true).is_none());
        assert!(buf.write_chunk(&[0u8; 17], true).is_none());
        assert!(buf.write_chunk(&[0u8; 16], true).is_some());
        assert!(!buf.can_fit_chunk(17));
    }

    #[test]
    fn test_wraparound_write_invalidates_overlapped() {
        let mut buf = MemfaultBuffer::new(10, 16);
        let a = buf.write_chunk(&[1u8; 4], true).unwrap();
        let b = buf.write_chunk(&[2u8; 4], true).unwrap();
        // Occupies 8..10 and wraps to 0..2, clobbering `a` but not `b`
        let c = buf.write_chunk(&[3, 3, 3, 3], false).unwrap();
        assert_eq!(c.offset, 8);
        let live = buf.chunks();
        assert!(!live.contains(&a));
        assert!(live.contains(&b));
        assert_eq!(buf.read_chunk_data(&c), vec![3, 3, 3, 3]);
    }

    #[test]
    fn test_write_after_wrapped_chunk_invalidates_it() {
        let mut buf = MemfaultBuffer::new(10, 16);
        buf.write_chunk(&[1u8; 8], true);
        let wrapped = buf.write_chunk(&[2u8; 4], true).unwrap();
        assert_eq!(wrapped.offset, 8);
        // Cursor is now at 2; writing 2..5 is clear of the wrapped chunk's 0..2 tail
        let next = buf.write_chunk(&[4u8; 3], true).unwrap();
        assert!(buf.chunks().contains(&wrapped));
        assert!(buf.chunks().contains(&next));
    }

    #[test]
    fn test_descriptor_cap_evicts_oldest() {
        let mut buf = MemfaultBuffer::new(1024, 16);
        let first = buf.write_chunk(&[0u8; 1], true).unwrap();
        for _ in 0..16 {
            buf.write_chunk(&[0u8; 1], true);
        }
        assert_eq!(buf.chunks().len(), 16);
        assert!(!buf.chunks().contains(&first));
    }

    #[test]
    fn test_upload_tracking() {
        let mut buf = MemfaultBuffer::new(64, 16);
        let a = buf.write_chunk(&[1u8; 4], true).unwrap();
        let b = buf.write_chunk(&[2u8; 4], true).unwrap();
        buf.mark_uploaded(&[a]);
        assert_eq!(buf.unuploaded_chunks(), vec![b]);
        assert_eq!(buf.chunks(), vec![a, b]);
    }
}
