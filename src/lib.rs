//! # coilspring - multi-timeframe coil spring detector
//!
//! Screens symbols for "coil spring" setups: a bundle of moving averages that is
//! contracting on a fast timeframe, aligning or turning up on a medium timeframe,
//! and trending favorably on a slow timeframe. Each timeframe is checked by one
//! stage; the pipeline evaluates every stage independently and folds the enabled
//! ones into a single verdict per symbol.
//!
//! ## Quick Start
//!
//! ```rust
//! use coilspring::prelude::*;
//!
//! // Hourly bars; a real caller supplies 1h, 4h and 1d series separately.
//! let bars: Vec<Bar> = (0..300)
//!     .map(|i| {
//!         let close = 100.0 + (i as f64 * 0.1).sin();
//!         Bar::new(i as i64 * 3_600_000, close, close + 0.5, close - 0.5, close, 1_000.0)
//!     })
//!     .collect();
//!
//! let pipeline = PipelineBuilder::new()
//!     .with_coil_spring_defaults()
//!     .build()
//!     .unwrap();
//!
//! let input = SymbolBars::new("BTC/USDT")
//!     .with(Timeframe::H1, &bars)
//!     .with(Timeframe::H4, &bars)
//!     .with(Timeframe::D1, &bars);
//!
//! let verdict = pipeline.evaluate_bars(&input).unwrap();
//! assert_eq!(verdict.stages.len(), 3);
//! ```

pub mod features;
pub mod params;
pub mod pipeline;
pub mod report;
pub mod stage;

pub use features::{FeatureConfig, FeatureFrame, FeatureSnapshot, MaKind, MaSpec};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineConfig, PipelineVerdict};
pub use stage::{
    Bound, CoilGroup, CombineMode, ConditionCheck, ConditionGroup, GroupVerdict, Outcome,
    SlopeRule, StageConfig, StageStatus, StageVerdict, TrendGroup,
};

pub mod prelude {
    pub use crate::{
        // Parallel
        evaluate_parallel,
        // Features
        features::{CoilLimits, FeatureConfig, FeatureFrame, FeatureSnapshot, MaKind, MaSpec},
        // Parameters
        params::{ParamMeta, ParamType, ParameterizedGroup},
        // Pipeline
        pipeline::{Pipeline, PipelineBuilder, PipelineConfig, PipelineVerdict},
        // Reporting
        report::{Presentation, ReportRow},
        // Stages
        stage::{
            Bound, CoilGroup, CombineMode, ConditionCheck, ConditionGroup, GroupVerdict, Outcome,
            SlopeRule, StageConfig, StageStatus, StageVerdict, TrendGroup,
        },
        // Types
        Bar,
        BarSeries,
        EvaluationError,
        InsufficientData,
        OHLCVExt,
        Period,
        // Errors
        PipelineError,
        Result,
        SymbolBars,
        Timeframe,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort evaluation of a symbol (data integrity) or of a whole
/// run (configuration).
///
/// Running out of history is not an error; see [`InsufficientData`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Data integrity: {symbol} [{timeframe}] bar {index}: {reason}")]
    DataIntegrity {
        symbol: String,
        timeframe: Timeframe,
        index: usize,
        reason: &'static str,
    },
}

impl PipelineError {
    /// True for errors raised while validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfig(_)
                | PipelineError::InvalidValue(_)
                | PipelineError::OutOfRange { .. }
        )
    }
}

/// A series (or a lookback window inside it) is too short to evaluate.
///
/// This is an expected outcome: the affected stage reports
/// [`StageStatus::Insufficient`] and can never pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct InsufficientData {
    pub need: usize,
    pub got: usize,
    pub reason: &'static str,
}

impl std::fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: need {} bars, got {}", self.reason, self.need, self.got)
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PipelineError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// TIMEFRAME
// ============================================================

/// Bar interval of a series
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// Nominal bar length in milliseconds
    pub fn millis(self) -> i64 {
        const HOUR: i64 = 3_600_000;
        match self {
            Timeframe::M15 => HOUR / 4,
            Timeframe::H1 => HOUR,
            Timeframe::H4 => 4 * HOUR,
            Timeframe::D1 => 24 * HOUR,
            Timeframe::W1 => 7 * 24 * HOUR,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown timeframe '{other}'"
            ))),
        }
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    /// Bar open time. Series without timestamps are rejected.
    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Blanket impl for references to dyn OHLCV
impl OHLCV for &dyn OHLCV {
    fn open(&self) -> f64 {
        (*self).open()
    }

    fn high(&self) -> f64 {
        (*self).high()
    }

    fn low(&self) -> f64 {
        (*self).low()
    }

    fn close(&self) -> f64 {
        (*self).close()
    }

    fn volume(&self) -> f64 {
        (*self).volume()
    }

    fn timestamp(&self) -> Option<i64> {
        (*self).timestamp()
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    #[inline]
    fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let range = self.range();
        match prev_close {
            Some(pc) => range
                .max((self.high() - pc).abs())
                .max((self.low() - pc).abs()),
            None => range,
        }
    }

    /// First consistency problem found in this bar, if any
    fn integrity_issue(&self) -> Option<&'static str> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Some("NaN in OHLC");
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Some("infinite value in OHLC");
        }
        if self.high() < self.low() {
            return Some("high < low");
        }
        let volume = self.volume();
        if volume.is_nan() || volume < 0.0 {
            return Some("volume is negative or NaN");
        }
        None
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Plain OHLCV bar with an epoch-millisecond timestamp
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.ts)
    }
}

// ============================================================
// BAR SERIES
// ============================================================

/// Validated, timestamp-ordered bars for one (symbol, timeframe) pair.
///
/// Construction rejects the whole series on the first integrity problem, so
/// everything downstream may assume strictly increasing timestamps.
#[derive(Debug, Clone, Copy)]
pub struct BarSeries<'a, T: OHLCV> {
    symbol: &'a str,
    timeframe: Timeframe,
    bars: &'a [T],
}

impl<'a, T: OHLCV> BarSeries<'a, T> {
    pub fn new(symbol: &'a str, timeframe: Timeframe, bars: &'a [T]) -> Result<Self> {
        let reject = |index: usize, reason: &'static str| PipelineError::DataIntegrity {
            symbol: symbol.to_string(),
            timeframe,
            index,
            reason,
        };

        let mut prev_ts: Option<i64> = None;
        for (i, bar) in bars.iter().enumerate() {
            let ts = bar.timestamp().ok_or_else(|| reject(i, "missing timestamp"))?;
            if let Some(prev) = prev_ts {
                if ts == prev {
                    return Err(reject(i, "duplicate timestamp"));
                }
                if ts < prev {
                    return Err(reject(i, "timestamps not increasing"));
                }
            }
            if let Some(reason) = bar.integrity_issue() {
                return Err(reject(i, reason));
            }
            prev_ts = Some(ts);
        }

        Ok(Self {
            symbol,
            timeframe,
            bars,
        })
    }

    #[inline]
    pub fn symbol(&self) -> &'a str {
        self.symbol
    }

    #[inline]
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    #[inline]
    pub fn bars(&self) -> &'a [T] {
        self.bars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Unvalidated input for one symbol: raw bars per timeframe
#[derive(Debug, Clone)]
pub struct SymbolBars<'a, T: OHLCV> {
    pub symbol: &'a str,
    pub series: Vec<(Timeframe, &'a [T])>,
}

impl<'a, T: OHLCV> SymbolBars<'a, T> {
    pub fn new(symbol: &'a str) -> Self {
        Self {
            symbol,
            series: Vec::new(),
        }
    }

    /// Attach the bars of one timeframe
    pub fn with(mut self, timeframe: Timeframe, bars: &'a [T]) -> Self {
        self.series.push((timeframe, bars));
        self
    }

    /// Validate every attached series
    pub fn validate(&self) -> Result<Vec<BarSeries<'a, T>>> {
        let mut out: Vec<BarSeries<'a, T>> = Vec::with_capacity(self.series.len());
        for &(timeframe, bars) in &self.series {
            if out.iter().any(|s| s.timeframe() == timeframe) {
                return Err(PipelineError::DataIntegrity {
                    symbol: self.symbol.to_string(),
                    timeframe,
                    index: 0,
                    reason: "timeframe supplied twice",
                });
            }
            out.push(BarSeries::new(self.symbol, timeframe, bars)?);
        }
        Ok(out)
    }
}

// ============================================================
// PARALLEL EVALUATION
// ============================================================

use rayon::prelude::*;

/// Error from evaluating a single symbol
#[derive(Debug, Clone)]
pub struct EvaluationError {
    pub symbol: String,
    pub error: PipelineError,
}

/// Evaluate many symbols in parallel.
///
/// Symbols are independent; the pipeline is shared read-only. Results keep
/// input order. Symbols rejected for data integrity land in the error list.
pub fn evaluate_parallel<'a, T, I>(
    pipeline: &Pipeline,
    symbols: I,
) -> (Vec<PipelineVerdict>, Vec<EvaluationError>)
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = SymbolBars<'a, T>>,
{
    let results: Vec<_> = symbols
        .into_par_iter()
        .map(|input| {
            pipeline
                .evaluate_bars(&input)
                .map_err(|error| EvaluationError {
                    symbol: input.symbol.to_string(),
                    error,
                })
        })
        .collect();

    let mut verdicts = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(v) => verdicts.push(v),
            Err(e) => {
                tracing::warn!(symbol = %e.symbol, "symbol rejected: {}", e.error);
                errors.push(e);
            }
        }
    }

    tracing::info!(
        evaluated = verdicts.len(),
        passed = verdicts.iter().filter(|v| v.passed).count(),
        rejected = errors.len(),
        "batch evaluation finished"
    );

    (verdicts, errors)
}

// ============================================================
// TESTS
// ============================================================
