//! Pipeline orchestrator
//!
//! Runs every configured stage against one symbol and folds the enabled ones
//! into a single [`PipelineVerdict`]. Stages never short-circuit each other:
//! a symbol that fails the first stage still carries diagnostics for the rest.

use crate::{
    features::{FeatureConfig, MaSpec},
    stage::{CoilGroup, CombineMode, SlopeRule, StageConfig, StageVerdict, TrendGroup},
    BarSeries, InsufficientData, PipelineError, Result, SymbolBars, Timeframe, OHLCV,
};

// ============================================================
// CONFIGURATION
// ============================================================

/// Full run configuration: ordered stages plus the presentation flag
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageConfig>,
    /// Keep every symbol in reports instead of only passers. Forwarded on
    /// each verdict; evaluation ignores it.
    #[serde(default)]
    pub benchmark: bool,
}

impl PipelineConfig {
    /// Parse a TOML document. Validation happens in [`Pipeline::from_config`].
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }

    /// 1h coil, 4h coil-or-turning-up, 1d trend confirmation
    pub fn coil_spring_defaults() -> Self {
        const EMA21: MaSpec = MaSpec::ema_const(21);
        const SMA50: MaSpec = MaSpec::sma_const(50);
        const SMA150: MaSpec = MaSpec::sma_const(150);

        let coil_1h = StageConfig::new("coil_1h", Timeframe::H1, FeatureConfig::ribbon(72))
            .coil(CoilGroup {
                max_width_pct: 3.0,
                max_volatility_ratio: 1.2,
                min_persistence: 10,
            })
            .trend(TrendGroup::new(vec![SlopeRule::at_least(EMA21, -0.10)]));

        let match_4h = StageConfig::new("match_4h", Timeframe::H4, FeatureConfig::ribbon(20))
            .mode(CombineMode::Any)
            .coil(CoilGroup {
                max_width_pct: 8.0,
                max_volatility_ratio: 1.2,
                min_persistence: 4,
            })
            .trend(TrendGroup::new(vec![
                SlopeRule::at_least(EMA21, 0.0),
                SlopeRule::at_least(SMA50, 0.0),
            ]));

        let confirm_1d = StageConfig::new("confirm_1d", Timeframe::D1, FeatureConfig::ribbon(20))
            .trend(TrendGroup::new(vec![SlopeRule::at_least(SMA150, 0.0)]).tolerance(0.0));

        Self {
            stages: vec![coil_1h, match_4h, confirm_1d],
            benchmark: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(PipelineError::InvalidConfig("no stages configured".into()));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(PipelineError::InvalidConfig(format!(
                    "stage name '{}' used twice",
                    stage.name
                )));
            }
            stage.validate()?;
        }
        if !self.stages.iter().any(|s| s.enabled) {
            return Err(PipelineError::InvalidConfig(
                "every stage is disabled".into(),
            ));
        }
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.name == name)
    }
}

// ============================================================
// PIPELINE
// ============================================================

/// Validated, immutable pipeline. Share it by reference across threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn stages(&self) -> &[StageConfig] {
        &self.config.stages
    }

    /// Evaluate one symbol from already validated series.
    ///
    /// Each stage picks the series matching its timeframe. An enabled stage
    /// with no such series is reported as insufficient data.
    pub fn evaluate<T: OHLCV>(
        &self,
        symbol: &str,
        series: &[BarSeries<'_, T>],
    ) -> Result<PipelineVerdict> {
        if let Some(other) = series.iter().find(|s| s.symbol() != symbol) {
            return Err(PipelineError::DataIntegrity {
                symbol: symbol.to_string(),
                timeframe: other.timeframe(),
                index: 0,
                reason: "series belongs to another symbol",
            });
        }

        let stages: Vec<StageVerdict> = self
            .config
            .stages
            .iter()
            .map(|stage| {
                if !stage.enabled {
                    return StageVerdict::disabled(stage);
                }
                match series.iter().find(|s| s.timeframe() == stage.timeframe) {
                    Some(s) => stage.evaluate_series(s),
                    None => StageVerdict::insufficient(
                        stage,
                        InsufficientData {
                            need: stage.features.required_bars(),
                            got: 0,
                            reason: "no series for this timeframe",
                        },
                    ),
                }
            })
            .collect();

        let passed = stages
            .iter()
            .filter(|v| v.is_enabled())
            .all(StageVerdict::passed);

        Ok(PipelineVerdict {
            symbol: symbol.to_string(),
            stages,
            passed,
            benchmark: self.config.benchmark,
        })
    }

    /// Validate raw bars, then evaluate.
    pub fn evaluate_bars<T: OHLCV>(&self, input: &SymbolBars<'_, T>) -> Result<PipelineVerdict> {
        let series = input.validate()?;
        self.evaluate(input.symbol, &series)
    }
}

/// Outcome of one symbol across every stage
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PipelineVerdict {
    pub symbol: String,
    /// One entry per configured stage, in configuration order
    pub stages: Vec<StageVerdict>,
    /// AND over enabled stages
    pub passed: bool,
    pub benchmark: bool,
}

impl PipelineVerdict {
    pub fn stage(&self, name: &str) -> Option<&StageVerdict> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn enabled_stages(&self) -> impl Iterator<Item = &StageVerdict> {
        self.stages.iter().filter(|s| s.is_enabled())
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for [`Pipeline`]
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    stages: Vec<StageConfig>,
    benchmark: bool,
    unknown: Vec<String>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the three reference stages
    pub fn with_coil_spring_defaults(mut self) -> Self {
        self.stages.extend(PipelineConfig::coil_spring_defaults().stages);
        self
    }

    /// Append a stage
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn benchmark(mut self, enable: bool) -> Self {
        self.benchmark = enable;
        self
    }

    pub fn disable(self, name: &str) -> Self {
        self.configure(name, |s| s.enabled = false)
    }

    pub fn enable(self, name: &str) -> Self {
        self.configure(name, |s| s.enabled = true)
    }

    /// Modify a stage added earlier. Unknown names fail at [`build`](Self::build).
    pub fn configure(mut self, name: &str, f: impl FnOnce(&mut StageConfig)) -> Self {
        match self.stages.iter_mut().find(|s| s.name == name) {
            Some(stage) => f(stage),
            None => self.unknown.push(name.to_string()),
        }
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        if let Some(name) = self.unknown.first() {
            return Err(PipelineError::InvalidConfig(format!(
                "no stage named '{name}'"
            )));
        }
        Pipeline::from_config(PipelineConfig {
            stages: self.stages,
            benchmark: self.benchmark,
        })
    }
}

// ============================================================
// TESTS
// ============================================================
