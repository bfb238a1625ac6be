//! Input validation utilities for everything that crosses the API boundary
//!
//! Enrollment names, thumbnails and feature vectors arrive from operators and
//! capture clients; these helpers reject malformed input before it reaches the
//! profile store, without panicking on hostile sizes or values.

use anyhow::{anyhow, Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for display names
pub const MAX_NAME_LENGTH: usize = 512;

/// Maximum length for a sample thumbnail payload (data URL)
pub const MAX_THUMBNAIL_LENGTH: usize = 2 * 1024 * 1024;

/// Maximum feature vector dimension accepted from clients
pub const MAX_VECTOR_DIM: usize = 4096;

// ============================================================================
// Safe Time Operations
// ============================================================================

/// Get current Unix timestamp in milliseconds, safely handling clock errors
///
/// Logs a warning and returns 0 if the clock is before the epoch
pub fn safe_unix_timestamp_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis() as u64,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "System clock is before UNIX epoch (1970-01-01), using timestamp 0"
            );
            0
        }
    }
}

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str, field_name: &str) -> Result<()> {
    validate_non_empty(name, field_name)?;
    validate_length(name, MAX_NAME_LENGTH, field_name)?;
    Ok(())
}

/// Validate a thumbnail payload (may be empty)
pub fn validate_thumbnail(thumbnail: &str) -> Result<()> {
    validate_length(thumbnail, MAX_THUMBNAIL_LENGTH, "thumbnail")
}

/// Parse a UUID string with a descriptive error
pub fn parse_uuid(uuid_str: &str, field_name: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str).with_context(|| format!("{} is not a valid UUID", field_name))
}

// ============================================================================
// Numeric Validation
// ============================================================================

/// Validate a feature vector: non-empty, bounded, all components finite
pub fn validate_vector(vector: &[f32], field_name: &str) -> Result<()> {
    if vector.is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    if vector.len() > MAX_VECTOR_DIM {
        return Err(anyhow!(
            "{} exceeds maximum dimension of {} (got {})",
            field_name,
            MAX_VECTOR_DIM,
            vector.len()
        ));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(anyhow!(
            "{} contains a non-finite value at position {}",
            field_name,
            pos
        ));
    }
    Ok(())
}

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
