//! Incremental CRC-32 used to validate multi-frame transfers.
//!
//! The accumulator is a trait so the frame accumulator and the crash-log
//! drain can be pointed at a different polynomial without touching their
//! logic. [`Crc32`] is the IEEE 802.3 variant (reflected, init and xor-out
//! `0xFFFFFFFF`) computed by `crc32fast`.

/// Running checksum with explicit init / update / finalize steps.
pub trait ChecksumAccumulator: Default {
    /// Return to the initial state.
    fn reset(&mut self);

    /// Feed more bytes.
    fn update(&mut self, data: &[u8]);

    /// Checksum of everything fed since the last reset. Does not consume state.
    fn finalize(&self) -> u32;
}

/// IEEE CRC-32.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot checksum of `data`.
    pub fn checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Crc32({:#010x})", self.finalize())
    }
}

impl ChecksumAccumulator for Crc32 {
    fn reset(&mut self) {
        self.hasher.reset();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}
