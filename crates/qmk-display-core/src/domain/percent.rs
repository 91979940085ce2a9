//! Whole-number percentage in `0..=100`.
//!
//! The keyboard renders CPU and RAM usage as single bytes.  Metric sources
//! report floating-point values that can drift slightly outside the nominal
//! range (or be NaN on the first sample), so conversion from `f64` clamps
//! instead of wrapping.

use std::fmt;

use thiserror::Error;

/// Error returned when a raw byte is not a valid percentage.
#[derive(Debug, Error, PartialEq)]
#[error("percentage out of range: {0} (expected 0..=100)")]
pub struct PercentOutOfRange(pub u8);

/// A percentage guaranteed to lie in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Percent(u8);

impl Percent {
    pub const MAX: Percent = Percent(100);

    /// Creates a percentage from an exact integer value.
    ///
    /// # Errors
    ///
    /// Returns [`PercentOutOfRange`] for values above 100.
    pub fn new(value: u8) -> Result<Self, PercentOutOfRange> {
        if value > 100 {
            Err(PercentOutOfRange(value))
        } else {
            Ok(Self(value))
        }
    }

    /// Converts a sampled floating-point percentage, truncating the fraction
    /// and clamping to `0..=100`.  NaN maps to 0.
    pub fn saturating_from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Self(0);
        }
        // `as` on a clamped f64 truncates toward zero.
        Self(value.clamp(0.0, 100.0) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Percent {
    type Error = PercentOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_boundaries() {
        assert_eq!(Percent::new(0).unwrap().get(), 0);
        assert_eq!(Percent::new(100).unwrap().get(), 100);
    }

    #[test]
    fn test_new_rejects_values_above_100() {
        assert_eq!(Percent::new(101), Err(PercentOutOfRange(101)));
        assert_eq!(Percent::try_from(255u8), Err(PercentOutOfRange(255)));
    }

    #[test]
    fn test_saturating_from_f64_truncates_fraction() {
        assert_eq!(Percent::saturating_from_f64(42.9).get(), 42);
        assert_eq!(Percent::saturating_from_f64(0.4).get(), 0);
    }

    #[test]
    fn test_saturating_from_f64_clamps_out_of_range_values() {
        assert_eq!(Percent::saturating_from_f64(-3.0).get(), 0);
        assert_eq!(Percent::saturating_from_f64(100.7).get(), 100);
        assert_eq!(Percent::saturating_from_f64(f64::INFINITY).get(), 100);
        assert_eq!(Percent::saturating_from_f64(f64::NAN).get(), 0);
    }

    #[test]
    fn test_display_appends_percent_sign() {
        assert_eq!(Percent::new(67).unwrap().to_string(), "67%");
    }
}
