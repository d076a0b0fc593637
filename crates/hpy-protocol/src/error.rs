//! Protocol-level errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("{what} response too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Fail with [`ProtocolError::TooShort`] when `data` is shorter than `expected`.
pub(crate) fn ensure_len(what: &'static str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(ProtocolError::TooShort {
            what,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
