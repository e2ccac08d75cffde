//! Feature engine
//!
//! Turns one validated [`BarSeries`](crate::BarSeries) into per-bar indicator
//! columns ([`FeatureFrame`]) and from those a latest-bar [`FeatureSnapshot`].
//!
//! # Features
//!
//! - **Moving averages**: EMA and SMA, identified as `EMA21`, `SMA150`, ...
//! - **Bundle width**: `(max - min) / min * 100` over the bundle members at one bar
//! - **Volatility ratio**: `true_range / ATR(atr_period)`
//! - **Slope**: `(MA[t] - MA[t - lookback]) / MA[t - lookback] * 100`
//! - **Coil persistence**: trailing run of bars where width and volatility ratio
//!   both sit at or under their limits
//!
//! Everything here is a pure function of the bars and a [`FeatureConfig`].

pub mod frame;
pub mod moving_average;
pub mod volatility;

pub use frame::*;
pub use moving_average::*;
pub use volatility::*;

use crate::{Period, PipelineError, Result};

/// Feature parameters for one timeframe
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureConfig {
    pub moving_averages: Vec<MaSpec>,
    /// Subset of `moving_averages` whose spread defines bundle width
    pub bundle: Vec<MaSpec>,
    #[serde(default = "default_atr_period")]
    pub atr_period: Period,
    pub slope_lookback: Period,
}

fn default_atr_period() -> Period {
    Period::new_const(14)
}

impl FeatureConfig {
    /// EMA21 / EMA40 / SMA50 / SMA150 with the first three as the bundle and ATR(14).
    pub fn ribbon(slope_lookback: usize) -> Self {
        Self {
            moving_averages: vec![
                MaSpec::ema_const(21),
                MaSpec::ema_const(40),
                MaSpec::sma_const(50),
                MaSpec::sma_const(150),
            ],
            bundle: vec![
                MaSpec::ema_const(21),
                MaSpec::ema_const(40),
                MaSpec::sma_const(50),
            ],
            atr_period: default_atr_period(),
            slope_lookback: Period::new_const(slope_lookback),
        }
    }

    /// Bars needed before every configured column has a value at the last bar
    pub fn required_bars(&self) -> usize {
        self.moving_averages
            .iter()
            .map(|ma| ma.period.get())
            .chain(std::iter::once(self.atr_period.get()))
            .max()
            .unwrap_or(0)
    }

    pub fn defines(&self, ma: &MaSpec) -> bool {
        self.moving_averages.contains(ma)
    }

    pub fn validate(&self) -> Result<()> {
        if self.moving_averages.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "no moving averages configured".into(),
            ));
        }
        // Period's const constructor skips the > 0 check
        let zero = self
            .moving_averages
            .iter()
            .chain(&self.bundle)
            .map(|ma| ma.period.get())
            .chain([self.atr_period.get(), self.slope_lookback.get()])
            .any(|p| p == 0);
        if zero {
            return Err(PipelineError::InvalidValue("Period must be > 0"));
        }
        for (i, ma) in self.moving_averages.iter().enumerate() {
            if self.moving_averages[..i].contains(ma) {
                return Err(PipelineError::InvalidConfig(format!(
                    "moving average {ma} defined twice"
                )));
            }
        }
        if self.bundle.len() < 2 {
            return Err(PipelineError::InvalidConfig(
                "bundle needs at least two moving averages".into(),
            ));
        }
        for (i, ma) in self.bundle.iter().enumerate() {
            if self.bundle[..i].contains(ma) {
                return Err(PipelineError::InvalidConfig(format!(
                    "bundle member {ma} listed twice"
                )));
            }
        }
        if let Some(missing) = self.bundle.iter().find(|ma| !self.defines(ma)) {
            return Err(PipelineError::InvalidConfig(format!(
                "bundle member {missing} is not a configured moving average"
            )));
        }
        Ok(())
    }
}

/// Width and volatility limits a bar must meet to count as coiled
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoilLimits {
    pub max_width_pct: f64,
    pub max_volatility_ratio: f64,
}

impl CoilLimits {
    #[inline]
    pub fn holds(&self, width_pct: Option<f64>, volatility_ratio: Option<f64>) -> bool {
        matches!(
            (width_pct, volatility_ratio),
            (Some(w), Some(v)) if w <= self.max_width_pct && v <= self.max_volatility_ratio
        )
    }
}
