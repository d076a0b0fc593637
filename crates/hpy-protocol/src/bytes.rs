//! Little-endian field access for command and response frames.
//!
//! Readers return `None` when the field does not fit in the slice; `byte_at`
//! reads a missing byte as zero, which is how the optional tail of the status
//! and DAQ-config responses is treated.

pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Single byte, or 0 when out of range.
pub fn byte_at(data: &[u8], offset: usize) -> u8 {
    data.get(offset).copied().unwrap_or(0)
}

/// u16 at `offset`, or 0 when it does not fit.
pub fn u16_at(data: &[u8], offset: usize) -> u16 {
    read_u16_le(data, offset).unwrap_or(0)
}

/// u32 at `offset`, or 0 when it does not fit.
pub fn u32_at(data: &[u8], offset: usize) -> u32 {
    read_u32_le(data, offset).unwrap_or(0)
}

/// Writes into a pre-sized buffer. Panics if the field does not fit, which
/// only happens for a mis-sized builder buffer.
pub fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Lower-case hex rendering used in log lines.
pub fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
