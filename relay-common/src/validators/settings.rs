//! Relay setting value validation
//!
//! Hosts send settings as plain integers, so values arrive signed and are
//! range-checked before anything is resized.

use crate::{MAX_PAIR_POOL_SIZE, MAX_STREAM_CHUNK_SIZE};

/// Validation error for numeric relay settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValueError {
    /// Value is zero or negative
    NotPositive,
    /// Value exceeds the allowed maximum
    TooLarge,
}

impl std::fmt::Display for SettingValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotPositive => write!(f, "must be greater than zero"),
            Self::TooLarge => write!(f, "exceeds the maximum"),
        }
    }
}

fn validate_positive(value: i64, max: usize) -> Result<usize, SettingValueError> {
    if value <= 0 {
        return Err(SettingValueError::NotPositive);
    }
    let value = usize::try_from(value).map_err(|_| SettingValueError::TooLarge)?;
    if value > max {
        return Err(SettingValueError::TooLarge);
    }
    Ok(value)
}

/// Validate a stream chunk size in bytes (1 to 16MB)
///
/// # Errors
///
/// Returns a `SettingValueError` variant describing the validation failure.
pub fn validate_stream_chunk_size(value: i64) -> Result<usize, SettingValueError> {
    validate_positive(value, MAX_STREAM_CHUNK_SIZE)
}

/// Validate a pairing pool size (1 to 64)
///
/// # Errors
///
/// Returns a `SettingValueError` variant describing the validation failure.
pub fn validate_pair_pool_size(value: i64) -> Result<usize, SettingValueError> {
    validate_positive(value, MAX_PAIR_POOL_SIZE)
}
