//! Stage evaluator
//!
//! A stage applies threshold checks to the latest features of one timeframe.
//! Checks are organised in at most two condition groups:
//!
//! - **coil**: bundle width, volatility ratio and persistence ("still coiled")
//! - **trend**: slope bounds on one or more moving averages ("turning up")
//!
//! Every comparison is three-valued. A check whose input is missing reports
//! [`Outcome::Insufficient`]; groups and stages fold those outcomes so that an
//! insufficient value can block a pass but never produce one.

use crate::{
    features::{CoilLimits, FeatureConfig, FeatureFrame, FeatureSnapshot, MaSpec},
    BarSeries, InsufficientData, PipelineError, Result, Timeframe, OHLCV,
};

// ============================================================
// CONFIGURATION
// ============================================================

/// How a stage folds its condition groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Every configured group must pass
    #[default]
    #[serde(alias = "and")]
    All,
    /// At least one group must pass
    #[serde(alias = "or", alias = "either")]
    Any,
}

/// "Still coiled" thresholds
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CoilGroup {
    pub max_width_pct: f64,
    pub max_volatility_ratio: f64,
    pub min_persistence: usize,
}

impl CoilGroup {
    #[inline]
    pub fn limits(&self) -> CoilLimits {
        CoilLimits {
            max_width_pct: self.max_width_pct,
            max_volatility_ratio: self.max_volatility_ratio,
        }
    }

    fn validate(&self) -> Result<()> {
        non_negative("max_width_pct", self.max_width_pct)?;
        non_negative("max_volatility_ratio", self.max_volatility_ratio)
    }
}

/// Bounds on the slope of one moving average, in percent
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SlopeRule {
    pub ma: MaSpec,
    #[serde(default)]
    pub min_pct: Option<f64>,
    #[serde(default)]
    pub max_pct: Option<f64>,
}

impl SlopeRule {
    pub fn at_least(ma: MaSpec, min_pct: f64) -> Self {
        Self {
            ma,
            min_pct: Some(min_pct),
            max_pct: None,
        }
    }

    pub fn at_most(ma: MaSpec, max_pct: f64) -> Self {
        Self {
            ma,
            min_pct: None,
            max_pct: Some(max_pct),
        }
    }

    pub fn between(ma: MaSpec, min_pct: f64, max_pct: f64) -> Self {
        Self {
            ma,
            min_pct: Some(min_pct),
            max_pct: Some(max_pct),
        }
    }
}

/// "Turning up" thresholds
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrendGroup {
    pub slopes: Vec<SlopeRule>,
    /// Widens every slope bound: `min - tolerance`, `max + tolerance`
    #[serde(default)]
    pub tolerance_pct: f64,
}

impl TrendGroup {
    pub fn new(slopes: Vec<SlopeRule>) -> Self {
        Self {
            slopes,
            tolerance_pct: 0.0,
        }
    }

    pub fn tolerance(mut self, tolerance_pct: f64) -> Self {
        self.tolerance_pct = tolerance_pct;
        self
    }

    fn validate(&self, features: &FeatureConfig) -> Result<()> {
        if self.slopes.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "trend group has no slope rules".into(),
            ));
        }
        non_negative("tolerance_pct", self.tolerance_pct)?;
        for rule in &self.slopes {
            if !features.defines(&rule.ma) {
                return Err(PipelineError::InvalidConfig(format!(
                    "slope rule on {} which is not a configured moving average",
                    rule.ma
                )));
            }
            match (rule.min_pct, rule.max_pct) {
                (None, None) => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "slope rule on {} has neither min_pct nor max_pct",
                        rule.ma
                    )))
                }
                (Some(min), Some(max)) if min > max => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "slope rule on {}: min_pct {min} > max_pct {max}",
                        rule.ma
                    )))
                }
                _ => {}
            }
            for bound in [rule.min_pct, rule.max_pct].into_iter().flatten() {
                if !bound.is_finite() {
                    return Err(PipelineError::InvalidValue("slope bound must be finite"));
                }
            }
        }
        Ok(())
    }
}

fn enabled_by_default() -> bool {
    true
}

/// One gated check on one timeframe
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub timeframe: Timeframe,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: CombineMode,
    pub features: FeatureConfig,
    #[serde(default)]
    pub coil: Option<CoilGroup>,
    #[serde(default)]
    pub trend: Option<TrendGroup>,
}

impl StageConfig {
    pub fn new(name: impl Into<String>, timeframe: Timeframe, features: FeatureConfig) -> Self {
        Self {
            name: name.into(),
            timeframe,
            enabled: true,
            mode: CombineMode::All,
            features,
            coil: None,
            trend: None,
        }
    }

    pub fn mode(mut self, mode: CombineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn coil(mut self, coil: CoilGroup) -> Self {
        self.coil = Some(coil);
        self
    }

    pub fn trend(mut self, trend: TrendGroup) -> Self {
        self.trend = Some(trend);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("stage name is empty".into()));
        }
        let in_stage = |e: PipelineError| match e {
            PipelineError::InvalidConfig(msg) => {
                PipelineError::InvalidConfig(format!("stage '{}': {msg}", self.name))
            }
            other => other,
        };

        self.features.validate().map_err(in_stage)?;
        if let Some(coil) = &self.coil {
            coil.validate().map_err(in_stage)?;
        }
        if let Some(trend) = &self.trend {
            trend.validate(&self.features).map_err(in_stage)?;
        }

        if self.enabled {
            match (self.mode, &self.coil, &self.trend) {
                (_, None, None) => {
                    return Err(in_stage(PipelineError::InvalidConfig(
                        "enabled stage has no condition group".into(),
                    )))
                }
                (CombineMode::Any, Some(_), None) | (CombineMode::Any, None, Some(_)) => {
                    return Err(in_stage(PipelineError::InvalidConfig(
                        "mode 'any' needs both a coil and a trend group".into(),
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Compute features for `series` and evaluate this stage on its last bar.
    pub fn evaluate_series<T: OHLCV>(&self, series: &BarSeries<'_, T>) -> StageVerdict {
        if !self.enabled {
            return StageVerdict::disabled(self);
        }
        match FeatureFrame::compute(series, &self.features) {
            Ok(frame) => {
                let snapshot = frame.snapshot(
                    self.features.slope_lookback.get(),
                    self.coil.as_ref().map(CoilGroup::limits),
                );
                self.evaluate(snapshot)
            }
            Err(insufficient) => StageVerdict::insufficient(self, insufficient),
        }
    }

    /// Apply the thresholds to a snapshot.
    ///
    /// A disabled stage reports [`StageStatus::Disabled`] without looking at
    /// the snapshot.
    pub fn evaluate(&self, snapshot: FeatureSnapshot) -> StageVerdict {
        if !self.enabled {
            return StageVerdict::disabled(self);
        }

        let mut groups = Vec::with_capacity(2);
        if let Some(coil) = &self.coil {
            groups.push(GroupVerdict::new(ConditionGroup::Coil, coil_checks(coil, &snapshot)));
        }
        if let Some(trend) = &self.trend {
            groups.push(GroupVerdict::new(ConditionGroup::Trend, trend_checks(trend, &snapshot)));
        }

        let outcomes = groups.iter().map(|g| g.outcome);
        let outcome = match self.mode {
            // nothing to satisfy is not a pass
            _ if groups.is_empty() => {
                tracing::warn!(stage = %self.name, "enabled stage has no condition groups");
                Outcome::Fail
            }
            CombineMode::All => Outcome::all(outcomes),
            CombineMode::Any => Outcome::any(outcomes),
        };
        let status = StageStatus::from(outcome);
        if status == StageStatus::Insufficient {
            tracing::debug!(
                stage = %self.name,
                timeframe = %self.timeframe,
                "stage has undefined feature values"
            );
        }

        StageVerdict {
            name: self.name.clone(),
            timeframe: self.timeframe,
            mode: self.mode,
            status,
            groups,
            snapshot: Some(snapshot),
            insufficient: None,
        }
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(PipelineError::OutOfRange {
            field,
            value,
            min: 0.0,
            max: f64::INFINITY,
        });
    }
    Ok(())
}

fn coil_checks(coil: &CoilGroup, snapshot: &FeatureSnapshot) -> Vec<ConditionCheck> {
    vec![
        ConditionCheck::new(
            "bundle_width_pct",
            snapshot.bundle_width_pct,
            Bound::AtMost,
            coil.max_width_pct,
        ),
        ConditionCheck::new(
            "volatility_ratio",
            snapshot.volatility_ratio,
            Bound::AtMost,
            coil.max_volatility_ratio,
        ),
        ConditionCheck::new(
            "coil_persistence",
            snapshot.coil_persistence.map(|n| n as f64),
            Bound::AtLeast,
            coil.min_persistence as f64,
        ),
    ]
}

fn trend_checks(trend: &TrendGroup, snapshot: &FeatureSnapshot) -> Vec<ConditionCheck> {
    let mut checks = Vec::with_capacity(trend.slopes.len());
    for rule in &trend.slopes {
        let name = format!("slope_pct[{}]", rule.ma);
        let actual = snapshot.slope(&rule.ma);
        if let Some(min) = rule.min_pct {
            checks.push(ConditionCheck::new(
                name.clone(),
                actual,
                Bound::AtLeast,
                min - trend.tolerance_pct,
            ));
        }
        if let Some(max) = rule.max_pct {
            checks.push(ConditionCheck::new(
                name,
                actual,
                Bound::AtMost,
                max + trend.tolerance_pct,
            ));
        }
    }
    checks
}

// ============================================================
// OUTCOMES
// ============================================================

/// Result of one comparison, group or stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    /// An input value was undefined
    Insufficient,
}

impl Outcome {
    /// Pass if every outcome passes, fail if any fails.
    pub fn all(outcomes: impl IntoIterator<Item = Outcome>) -> Outcome {
        let mut result = Outcome::Pass;
        for o in outcomes {
            match o {
                Outcome::Fail => return Outcome::Fail,
                Outcome::Insufficient => result = Outcome::Insufficient,
                Outcome::Pass => {}
            }
        }
        result
    }

    /// Pass if any outcome passes, fail if every one fails.
    pub fn any(outcomes: impl IntoIterator<Item = Outcome>) -> Outcome {
        let mut result = Outcome::Fail;
        for o in outcomes {
            match o {
                Outcome::Pass => return Outcome::Pass,
                Outcome::Insufficient => result = Outcome::Insufficient,
                Outcome::Fail => {}
            }
        }
        result
    }

    #[inline]
    pub fn is_pass(self) -> bool {
        self == Outcome::Pass
    }
}

/// Direction of an inclusive one-sided threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// `actual <= threshold`
    AtMost,
    /// `actual >= threshold`
    AtLeast,
}

impl Bound {
    #[inline]
    pub fn holds(self, actual: f64, threshold: f64) -> bool {
        match self {
            Bound::AtMost => actual <= threshold,
            Bound::AtLeast => actual >= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionGroup {
    Coil,
    Trend,
}

/// One threshold comparison, kept for diagnostics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConditionCheck {
    pub name: String,
    pub actual: Option<f64>,
    pub bound: Bound,
    pub threshold: f64,
    pub outcome: Outcome,
}

impl ConditionCheck {
    pub fn new(name: impl Into<String>, actual: Option<f64>, bound: Bound, threshold: f64) -> Self {
        let outcome = match actual {
            Some(v) if bound.holds(v, threshold) => Outcome::Pass,
            Some(_) => Outcome::Fail,
            None => Outcome::Insufficient,
        };
        Self {
            name: name.into(),
            actual,
            bound,
            threshold,
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GroupVerdict {
    pub group: ConditionGroup,
    pub outcome: Outcome,
    pub checks: Vec<ConditionCheck>,
}

impl GroupVerdict {
    fn new(group: ConditionGroup, checks: Vec<ConditionCheck>) -> Self {
        let outcome = Outcome::all(checks.iter().map(|c| c.outcome));
        Self {
            group,
            outcome,
            checks,
        }
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.outcome.is_pass()
    }
}

// ============================================================
// STAGE VERDICT
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Passed,
    Failed,
    /// Not enough history to decide; never counts as a pass
    Insufficient,
    /// Vacuous pass, left out of the overall verdict
    Disabled,
}

impl From<Outcome> for StageStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Pass => StageStatus::Passed,
            Outcome::Fail => StageStatus::Failed,
            Outcome::Insufficient => StageStatus::Insufficient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StageVerdict {
    pub name: String,
    pub timeframe: Timeframe,
    pub mode: CombineMode,
    pub status: StageStatus,
    pub groups: Vec<GroupVerdict>,
    /// Features the decision was made on; absent when disabled or too short
    pub snapshot: Option<FeatureSnapshot>,
    /// Set when the series was too short to compute features at all
    pub insufficient: Option<InsufficientData>,
}

impl StageVerdict {
    pub fn disabled(config: &StageConfig) -> Self {
        Self {
            name: config.name.clone(),
            timeframe: config.timeframe,
            mode: config.mode,
            status: StageStatus::Disabled,
            groups: Vec::new(),
            snapshot: None,
            insufficient: None,
        }
    }

    pub fn insufficient(config: &StageConfig, insufficient: InsufficientData) -> Self {
        tracing::debug!(
            stage = %config.name,
            timeframe = %config.timeframe,
            need = insufficient.need,
            got = insufficient.got,
            "insufficient data"
        );
        Self {
            name: config.name.clone(),
            timeframe: config.timeframe,
            mode: config.mode,
            status: StageStatus::Insufficient,
            groups: Vec::new(),
            snapshot: None,
            insufficient: Some(insufficient),
        }
    }

    /// True when passed or disabled
    #[inline]
    pub fn passed(&self) -> bool {
        matches!(self.status, StageStatus::Passed | StageStatus::Disabled)
    }

    /// Whether this stage takes part in the overall verdict
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.status != StageStatus::Disabled
    }

    pub fn group(&self, group: ConditionGroup) -> Option<&GroupVerdict> {
        self.groups.iter().find(|g| g.group == group)
    }
}

// ============================================================
// TESTS
// ============================================================
