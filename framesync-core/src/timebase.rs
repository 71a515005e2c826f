//! Rational timebases and exact PTS rescaling.
//!
//! All arithmetic runs in 128-bit integers so a rescale never loses
//! precision beyond the final rounding step. Rounding is to nearest with
//! ties away from zero, the same default the native media library uses for
//! its own timestamp conversions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BufferError;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Duration of one PTS tick, as `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timebase {
    num: i32,
    den: i32,
}

impl Timebase {
    /// 90 kHz MPEG system clock
    pub const MPEG: Timebase = Timebase { num: 1, den: 90_000 };
    pub const MILLISECONDS: Timebase = Timebase { num: 1, den: 1_000 };
    pub const MICROSECONDS: Timebase = Timebase { num: 1, den: 1_000_000 };
    /// One tick per sample at 48 kHz
    pub const AUDIO_48K: Timebase = Timebase { num: 1, den: 48_000 };

    /// Create a timebase. Both parts must be strictly positive.
    pub fn new(num: i32, den: i32) -> Result<Self, BufferError> {
        if num <= 0 || den <= 0 {
            return Err(BufferError::InvalidTimebase { num, den });
        }
        Ok(Self { num, den })
    }

    pub fn numerator(&self) -> i32 {
        self.num
    }

    pub fn denominator(&self) -> i32 {
        self.den
    }

    /// Number of ticks of this timebase covering `duration`.
    pub fn ticks_from_duration(&self, duration: Duration) -> i64 {
        let nanos = duration.as_nanos() as i128;
        let num = nanos * self.den as i128;
        let den = self.num as i128 * NANOS_PER_SEC;
        saturate(div_round(num, den))
    }

    /// Wall-clock length of `ticks`, for display only.
    pub fn to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::MPEG
    }
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Timebase {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BufferError::ParseTimebase(s.to_string());
        let (num, den) = s.trim().split_once('/').ok_or_else(invalid)?;
        let num = num.trim().parse::<i32>().map_err(|_| invalid())?;
        let den = den.trim().parse::<i32>().map_err(|_| invalid())?;
        Self::new(num, den)
    }
}

impl TryFrom<String> for Timebase {
    type Error = BufferError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timebase> for String {
    fn from(tb: Timebase) -> Self {
        tb.to_string()
    }
}

/// Convert `pts` from one timebase into another.
pub fn rescale(pts: i64, from: Timebase, to: Timebase) -> i64 {
    if from == to {
        return pts;
    }
    let num = pts as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    saturate(div_round(num, den))
}

// den is always positive here
fn div_round(num: i128, den: i128) -> i128 {
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        -((-num + half) / den)
    }
}

fn saturate(v: i128) -> i64 {
    v.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
