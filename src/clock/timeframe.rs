//! Bar timeframes and boundary alignment
//!
//! All alignment math is integer unix-second arithmetic so repeated
//! boundary computation cannot drift.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Supported bar sizes.
///
/// Boundaries: 1m at :00 seconds; 5m/15m/30m at the matching minute marks;
/// 1h on the hour; 4h at 00/04/08/12/16/20 UTC; 1d at 00:00:00 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: &'static [Timeframe] = &[
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Bar duration in whole seconds.
    #[inline]
    pub fn duration_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    /// The bar boundary at or before `ts`.
    pub fn align_down(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.duration_secs();
        let epoch = ts.timestamp();
        let aligned = epoch - epoch.rem_euclid(secs);
        Utc.timestamp_opt(aligned, 0).single().expect("aligned unix second is valid")
    }

    /// The first bar boundary strictly after `ts`.
    pub fn next_boundary(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // align_down(ts) + one bar is strictly after ts: when ts sits exactly
        // on a boundary the next boundary is one bar later.
        let next = self.align_down(ts).timestamp() + self.duration_secs();
        Utc.timestamp_opt(next, 0).single().expect("boundary unix second is valid")
    }

    /// True when `ts` sits exactly on a bar boundary.
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.duration_secs()) == 0
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for unrecognized timeframe strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeframeError(pub String);

impl fmt::Display for ParseTimeframeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown timeframe: {}", self.0)
    }
}

impl std::error::Error for ParseTimeframeError {}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(ParseTimeframeError(other.to_string())),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = ParseTimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_align_down() {
        let ts = utc(2024, 3, 5, 14, 37, 22);
        assert_eq!(Timeframe::M1.align_down(ts), utc(2024, 3, 5, 14, 37, 0));
        assert_eq!(Timeframe::M5.align_down(ts), utc(2024, 3, 5, 14, 35, 0));
        assert_eq!(Timeframe::M15.align_down(ts), utc(2024, 3, 5, 14, 30, 0));
        assert_eq!(Timeframe::M30.align_down(ts), utc(2024, 3, 5, 14, 30, 0));
        assert_eq!(Timeframe::H1.align_down(ts), utc(2024, 3, 5, 14, 0, 0));
        assert_eq!(Timeframe::H4.align_down(ts), utc(2024, 3, 5, 12, 0, 0));
        assert_eq!(Timeframe::D1.align_down(ts), utc(2024, 3, 5, 0, 0, 0));
    }

    #[test]
    fn test_next_boundary_strictly_after() {
        let on_boundary = utc(2024, 3, 5, 14, 0, 0);
        assert_eq!(
            Timeframe::H1.next_boundary(on_boundary),
            utc(2024, 3, 5, 15, 0, 0)
        );

        let mid_bar = utc(2024, 3, 5, 14, 59, 59);
        assert_eq!(Timeframe::H1.next_boundary(mid_bar), utc(2024, 3, 5, 15, 0, 0));
    }

    #[test]
    fn test_h4_boundaries_are_utc_anchored() {
        let ts = utc(2024, 3, 5, 17, 0, 0);
        assert_eq!(Timeframe::H4.align_down(ts), utc(2024, 3, 5, 16, 0, 0));
        assert_eq!(Timeframe::H4.next_boundary(ts), utc(2024, 3, 5, 20, 0, 0));
    }

    #[test]
    fn test_is_aligned() {
        assert!(Timeframe::D1.is_aligned(utc(2024, 1, 1, 0, 0, 0)));
        assert!(!Timeframe::D1.is_aligned(utc(2024, 1, 1, 0, 0, 1)));
        assert!(Timeframe::M5.is_aligned(utc(2024, 1, 1, 10, 25, 0)));
        assert!(!Timeframe::M5.is_aligned(utc(2024, 1, 1, 10, 26, 0)));
    }

    #[test]
    fn test_string_roundtrip() {
        for tf in Timeframe::ALL {
            let parsed: Timeframe = tf.as_str().parse().unwrap();
            assert_eq!(parsed, *tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());
    }
}
