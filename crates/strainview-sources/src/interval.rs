use std::fmt;

use serde::{Deserialize, Serialize};

/// Width of a requested time window in seconds.
///
/// Always within [`IntervalLength::MIN`] and [`IntervalLength::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct IntervalLength(f64);

impl IntervalLength {
    /// The narrowest window, 1/8 s.
    pub const MIN: IntervalLength = IntervalLength(0.125);
    /// The widest window, 64 s.
    pub const MAX: IntervalLength = IntervalLength(64.0);

    /// The power-of-two steps offered when zooming.
    pub const LADDER: [f64; 10] = [0.125, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];

    /// Creates an interval length, or `None` if `secs` is outside the supported bounds.
    pub fn new(secs: f64) -> Option<Self> {
        (secs.is_finite() && (Self::MIN.0..=Self::MAX.0).contains(&secs)).then_some(Self(secs))
    }

    /// Snaps `secs` to the closest ladder step.
    ///
    /// Distance is measured on a logarithmic scale, so `3.0` snaps to `4.0` rather than `2.0`.
    /// Out-of-range and non-finite values snap to the nearest end of the ladder.
    pub fn nearest_step(secs: f64) -> Self {
        if secs.is_nan() || secs <= Self::MIN.0 {
            return Self::MIN;
        }
        if secs >= Self::MAX.0 {
            return Self::MAX;
        }

        let target = secs.log2();
        let step = Self::LADDER
            .into_iter()
            .min_by(|a, b| {
                let da = (a.log2() - target).abs();
                let db = (b.log2() - target).abs();
                da.total_cmp(&db)
            })
            .unwrap_or(Self::MAX.0);
        Self(step)
    }

    /// The ladder step below this length, if any.
    pub fn zoom_in(self) -> Option<Self> {
        Self::LADDER.into_iter().rev().find(|s| *s < self.0).map(Self)
    }

    /// The ladder step above this length, if any.
    pub fn zoom_out(self) -> Option<Self> {
        Self::LADDER.into_iter().find(|s| *s > self.0).map(Self)
    }

    /// Moves `steps` ladder steps, outwards for positive and inwards for negative values.
    ///
    /// Stops at the ends of the ladder.
    pub fn zoomed(self, steps: i32) -> Self {
        let mut len = self;
        for _ in 0..steps.unsigned_abs() {
            let next = if steps > 0 { len.zoom_out() } else { len.zoom_in() };
            match next {
                Some(next) => len = next,
                None => break,
            }
        }
        len
    }

    /// The length in seconds.
    pub fn as_secs(self) -> f64 {
        self.0
    }
}

impl Default for IntervalLength {
    fn default() -> Self {
        Self(4.0)
    }
}

impl fmt::Display for IntervalLength {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl TryFrom<f64> for IntervalLength {
    type Error = String;

    fn try_from(secs: f64) -> Result<Self, Self::Error> {
        Self::new(secs).ok_or_else(|| {
            format!(
                "interval of {secs}s outside of {}..={}",
                Self::MIN,
                Self::MAX
            )
        })
    }
}

impl From<IntervalLength> for f64 {
    fn from(len: IntervalLength) -> Self {
        len.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        assert_eq!(IntervalLength::new(0.125), Some(IntervalLength::MIN));
        assert_eq!(IntervalLength::new(64.0), Some(IntervalLength::MAX));
        assert_eq!(IntervalLength::new(0.1), None);
        assert_eq!(IntervalLength::new(65.0), None);
        assert_eq!(IntervalLength::new(f64::INFINITY), None);
    }

    #[test]
    fn test_nearest_step() {
        let snap = |secs| IntervalLength::nearest_step(secs).as_secs();
        assert_eq!(snap(3.0), 4.0);
        assert_eq!(snap(2.7), 2.0);
        assert_eq!(snap(0.01), 0.125);
        assert_eq!(snap(1000.0), 64.0);
        assert_eq!(snap(f64::NAN), 0.125);
        assert_eq!(snap(16.0), 16.0);
    }

    #[test]
    fn test_zoom_steps() {
        let len = IntervalLength::default();
        assert_eq!(len.zoom_in().map(IntervalLength::as_secs), Some(2.0));
        assert_eq!(len.zoom_out().map(IntervalLength::as_secs), Some(8.0));
        assert_eq!(IntervalLength::MAX.zoom_out(), None);
        assert_eq!(IntervalLength::MIN.zoom_in(), None);
    }

    #[test]
    fn test_zoomed() {
        let len = IntervalLength::default();
        assert_eq!(len.zoomed(0), len);
        assert_eq!(len.zoomed(2).as_secs(), 16.0);
        assert_eq!(len.zoomed(-3).as_secs(), 0.5);
        assert_eq!(len.zoomed(100), IntervalLength::MAX);
        assert_eq!(len.zoomed(i32::MIN), IntervalLength::MIN);
        assert_eq!(IntervalLength::nearest_step(3.0).zoomed(-1).as_secs(), 2.0);
    }

    #[test]
    fn test_deserialize() {
        let len: IntervalLength = serde_json::from_str("0.5").unwrap();
        assert_eq!(len.as_secs(), 0.5);
        let err = serde_json::from_str::<IntervalLength>("128").unwrap_err();
        assert!(err.to_string().contains("outside of 0.125s..=64s"));
    }
}
