use crate::error::{FaceError, FaceResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_THRESHOLD: f32 = 0.30;
pub const MAX_THRESHOLD: f32 = 0.80;
pub const DEFAULT_THRESHOLD: f32 = 0.55;

/// Maximum feature distance accepted as a positive identity match.
///
/// Always inside `[MIN_THRESHOLD, MAX_THRESHOLD]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct AcceptanceThreshold(f32);

impl AcceptanceThreshold {
    pub fn new(value: f32) -> FaceResult<Self> {
        if !value.is_finite() || !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&value) {
            return Err(FaceError::InvalidThreshold {
                value,
                min: MIN_THRESHOLD,
                max: MAX_THRESHOLD,
            });
        }
        Ok(Self(value))
    }

    /// Clamp an arbitrary value into range; non-finite values become the default
    pub fn clamped(value: f32) -> Self {
        if value.is_finite() {
            Self(value.clamp(MIN_THRESHOLD, MAX_THRESHOLD))
        } else {
            Self::default()
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for AcceptanceThreshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl TryFrom<f32> for AcceptanceThreshold {
    type Error = FaceError;

    fn try_from(value: f32) -> FaceResult<Self> {
        Self::new(value)
    }
}

impl From<AcceptanceThreshold> for f32 {
    fn from(threshold: AcceptanceThreshold) -> f32 {
        threshold.0
    }
}

impl fmt::Display for AcceptanceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_bounds() {
        assert_eq!(AcceptanceThreshold::default().value(), 0.55);
        assert!(AcceptanceThreshold::new(0.30).is_ok());
        assert!(AcceptanceThreshold::new(0.80).is_ok());
        assert!(matches!(
            AcceptanceThreshold::new(0.29),
            Err(FaceError::InvalidThreshold { .. })
        ));
        assert!(AcceptanceThreshold::new(0.81).is_err());
        assert!(AcceptanceThreshold::new(f32::NAN).is_err());
    }

    #[test]
    fn test_threshold_clamped() {
        assert_eq!(AcceptanceThreshold::clamped(0.1).value(), MIN_THRESHOLD);
        assert_eq!(AcceptanceThreshold::clamped(2.0).value(), MAX_THRESHOLD);
        assert_eq!(AcceptanceThreshold::clamped(0.6).value(), 0.6);
        assert_eq!(AcceptanceThreshold::clamped(f32::NAN), AcceptanceThreshold::default());
    }

    #[test]
    fn test_threshold_serde_rejects_out_of_range() {
        let ok: AcceptanceThreshold = serde_json::from_str("0.42").unwrap();
        assert_eq!(ok.value(), 0.42);
        assert!(serde_json::from_str::<AcceptanceThreshold>("0.95").is_err());
    }
}
