//! Per-bar feature columns and the latest-bar snapshot

use std::collections::BTreeMap;

use super::{
    moving_average::MaSpec,
    volatility::{average_true_range, true_ranges, volatility_ratios},
    CoilLimits, FeatureConfig,
};
use crate::{BarSeries, InsufficientData, Timeframe, OHLCV};

/// Indicator columns for every bar of one series
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    timeframe: Timeframe,
    timestamps: Vec<i64>,
    closes: Vec<f64>,
    averages: Vec<(MaSpec, Vec<Option<f64>>)>,
    bundle_width_pct: Vec<Option<f64>>,
    true_range: Vec<f64>,
    atr: Vec<Option<f64>>,
    volatility_ratio: Vec<Option<f64>>,
}

impl FeatureFrame {
    /// Compute every configured column.
    ///
    /// Returns [`InsufficientData`] when the series is shorter than the longest
    /// window in `config`; nothing is computed on a too-short series.
    pub fn compute<T: OHLCV>(
        series: &BarSeries<'_, T>,
        config: &FeatureConfig,
    ) -> std::result::Result<Self, InsufficientData> {
        let need = config.required_bars();
        if series.len() < need {
            return Err(InsufficientData {
                need,
                got: series.len(),
                reason: "series shorter than the longest indicator window",
            });
        }

        let bars = series.bars();
        // BarSeries guarantees every bar carries a timestamp
        let timestamps: Vec<i64> = bars.iter().filter_map(|b| b.timestamp()).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();

        let averages: Vec<(MaSpec, Vec<Option<f64>>)> = config
            .moving_averages
            .iter()
            .map(|ma| (*ma, ma.compute(&closes)))
            .collect();

        let members: Vec<&[Option<f64>]> = config
            .bundle
            .iter()
            .filter_map(|ma| {
                averages
                    .iter()
                    .find(|(spec, _)| spec == ma)
                    .map(|(_, col)| col.as_slice())
            })
            .collect();
        let bundle_width_pct = (0..closes.len())
            .map(|i| bundle_width_at(members.iter().map(|col| col[i])))
            .collect();

        let true_range = true_ranges(bars);
        let atr = average_true_range(&true_range, config.atr_period);
        let volatility_ratio = volatility_ratios(&true_range, &atr);

        Ok(Self {
            timeframe: series.timeframe(),
            timestamps,
            closes,
            averages,
            bundle_width_pct,
            true_range,
            atr,
            volatility_ratio,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    #[inline]
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn moving_average(&self, ma: &MaSpec) -> Option<&[Option<f64>]> {
        self.averages
            .iter()
            .find(|(spec, _)| spec == ma)
            .map(|(_, col)| col.as_slice())
    }

    #[inline]
    pub fn bundle_width_pct(&self) -> &[Option<f64>] {
        &self.bundle_width_pct
    }

    #[inline]
    pub fn true_range(&self) -> &[f64] {
        &self.true_range
    }

    #[inline]
    pub fn atr(&self) -> &[Option<f64>] {
        &self.atr
    }

    #[inline]
    pub fn volatility_ratio(&self) -> &[Option<f64>] {
        &self.volatility_ratio
    }

    /// Percent change of `ma` between the last bar and `lookback` bars earlier.
    ///
    /// `None` when the earlier bar does not exist, the average is still warming
    /// up there, or its value is zero.
    pub fn slope_pct(&self, ma: &MaSpec, lookback: usize) -> Option<f64> {
        let col = self.moving_average(ma)?;
        let t = col.len().checked_sub(1)?;
        let base = col[t.checked_sub(lookback)?]?;
        let current = col[t]?;
        if base == 0.0 {
            return None;
        }
        Some((current - base) / base * 100.0)
    }

    /// Trailing run of bars, ending at the last bar, that meet `limits`.
    pub fn coil_persistence(&self, limits: CoilLimits) -> usize {
        self.bundle_width_pct
            .iter()
            .zip(&self.volatility_ratio)
            .rev()
            .take_while(|(w, v)| limits.holds(**w, **v))
            .count()
    }

    /// Feature values at the last bar.
    ///
    /// Persistence is only counted when `coil` is given, since the run length
    /// depends on the caller's limits.
    pub fn snapshot(&self, slope_lookback: usize, coil: Option<CoilLimits>) -> FeatureSnapshot {
        let last = self.len().saturating_sub(1);

        let moving_averages = self
            .averages
            .iter()
            .filter_map(|(spec, col)| col.get(last).copied().flatten().map(|v| (*spec, v)))
            .collect();
        let slopes = self
            .averages
            .iter()
            .map(|(spec, _)| (*spec, self.slope_pct(spec, slope_lookback)))
            .collect();

        FeatureSnapshot {
            timeframe: self.timeframe,
            index: last,
            timestamp: self.timestamps.get(last).copied().unwrap_or_default(),
            close: self.closes.get(last).copied().unwrap_or(f64::NAN),
            moving_averages,
            bundle_width_pct: self.bundle_width_pct.get(last).copied().flatten(),
            volatility_ratio: self.volatility_ratio.get(last).copied().flatten(),
            slope_lookback,
            slopes,
            coil_persistence: coil.map(|limits| self.coil_persistence(limits)),
        }
    }
}

/// (max - min) / min * 100; undefined if any member is missing or min <= 0.
fn bundle_width_at(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    let mut count = 0usize;
    for v in values {
        let v = v?;
        lo = lo.min(v);
        hi = hi.max(v);
        count += 1;
    }
    if count == 0 || lo <= 0.0 {
        return None;
    }
    Some((hi - lo) / lo * 100.0)
}

/// Latest-bar features of one timeframe, as used by a stage
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FeatureSnapshot {
    pub timeframe: Timeframe,
    /// Bar index the values were taken at
    pub index: usize,
    pub timestamp: i64,
    pub close: f64,
    pub moving_averages: BTreeMap<MaSpec, f64>,
    pub bundle_width_pct: Option<f64>,
    pub volatility_ratio: Option<f64>,
    pub slope_lookback: usize,
    /// `None` entries could not be computed for lack of history
    pub slopes: BTreeMap<MaSpec, Option<f64>>,
    pub coil_persistence: Option<usize>,
}

impl FeatureSnapshot {
    #[inline]
    pub fn slope(&self, ma: &MaSpec) -> Option<f64> {
        self.slopes.get(ma).copied().flatten()
    }

    #[inline]
    pub fn moving_average(&self, ma: &MaSpec) -> Option<f64> {
        self.moving_averages.get(ma).copied()
    }
}
