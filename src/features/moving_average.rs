//! Exponential and simple moving averages
//!
//! Both return one value per input bar; bars inside the warm-up window
//! (the first `period - 1`) are `None` rather than partial averages.

use crate::{PipelineError, Period, Result};

/// Moving average family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaKind {
    Ema,
    Sma,
}

impl MaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MaKind::Ema => "EMA",
            MaKind::Sma => "SMA",
        }
    }
}

/// One moving average: family plus period. Rendered and parsed as `EMA21`, `SMA150`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaSpec {
    pub kind: MaKind,
    pub period: Period,
}

impl MaSpec {
    pub fn new(kind: MaKind, period: usize) -> Result<Self> {
        Ok(Self {
            kind,
            period: Period::new(period)?,
        })
    }

    #[doc(hidden)]
    pub const fn ema_const(period: usize) -> Self {
        Self {
            kind: MaKind::Ema,
            period: Period::new_const(period),
        }
    }

    #[doc(hidden)]
    pub const fn sma_const(period: usize) -> Self {
        Self {
            kind: MaKind::Sma,
            period: Period::new_const(period),
        }
    }

    pub fn ema(period: usize) -> Result<Self> {
        Self::new(MaKind::Ema, period)
    }

    pub fn sma(period: usize) -> Result<Self> {
        Self::new(MaKind::Sma, period)
    }

    /// Bars without a value at the start of a series
    #[inline]
    pub fn warm_up(&self) -> usize {
        self.period.get().saturating_sub(1)
    }

    pub fn compute(&self, values: &[f64]) -> Vec<Option<f64>> {
        match self.kind {
            MaKind::Ema => ema(values, self.period),
            MaKind::Sma => sma(values, self.period),
        }
    }
}

impl std::fmt::Display for MaSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind.as_str(), self.period.get())
    }
}

impl std::str::FromStr for MaSpec {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || PipelineError::InvalidConfig(format!("invalid moving average '{s}'"));
        if s.len() <= 3 || !s.is_char_boundary(3) {
            return Err(invalid());
        }
        let (prefix, digits) = s.split_at(3);
        let kind = match prefix.to_ascii_uppercase().as_str() {
            "EMA" => MaKind::Ema,
            "SMA" => MaKind::Sma,
            _ => return Err(invalid()),
        };
        let period: usize = digits.parse().map_err(|_| invalid())?;
        MaSpec::new(kind, period).map_err(|_| invalid())
    }
}

impl serde::Serialize for MaSpec {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for MaSpec {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Simple moving average: mean of the trailing `period` values.
pub fn sma(values: &[f64], period: Period) -> Vec<Option<f64>> {
    let n = period.get();
    (0..values.len())
        .map(|i| {
            if i + 1 < n {
                return None;
            }
            let window = &values[i + 1 - n..=i];
            Some(window.iter().sum::<f64>() / n as f64)
        })
        .collect()
}

/// Exponential moving average with `alpha = 2 / (period + 1)`, seeded with the
/// first value.
pub fn ema(values: &[f64], period: Period) -> Vec<Option<f64>> {
    let n = period.get();
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;

    for (i, &v) in values.iter().enumerate() {
        let cur = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        prev = Some(cur);
        out.push((i + 1 >= n).then_some(cur));
    }

    out
}
