//! Threshold metadata for condition groups
//!
//! This module describes the tunable thresholds of each condition group,
//! enabling:
//! - Benchmark sweeps over a threshold grid
//! - Threshold documentation
//! - Building groups from loosely typed parameter maps
//!
//! # Example
//!
//! ```rust
//! use coilspring::params::ParameterizedGroup;
//! use coilspring::prelude::*;
//!
//! for param in CoilGroup::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let widths = CoilGroup::param_meta()[0].generate_grid();
//! assert_eq!(widths.first(), Some(&0.5));
//! ```

use std::collections::HashMap;

use crate::{
  features::MaSpec,
  stage::{CoilGroup, SlopeRule, TrendGroup},
  PipelineError, Result,
};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of threshold value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Percentage, may be negative (slopes)
  Percent,
  /// Dimensionless ratio (volatility ratio)
  Ratio,
  /// Whole number of bars
  Bars,
}

/// Metadata for a single threshold
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "max_width_pct")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Sweep range: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn percent(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Percent, default, range, description }
  }

  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn bars(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Bars, default, range, description }
  }

  /// Every value of the sweep range, endpoints included
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    if step <= 0.0 {
      return vec![min];
    }
    // index-based so float drift cannot skip the last value
    let steps = ((max - min) / step + 1e-9).floor() as usize;
    (0..=steps).map(|i| min + i as f64 * step).collect()
  }

  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if !(min..=max).contains(&value) {
      return Err(PipelineError::OutOfRange { field: self.name, value, min, max });
    }
    if self.param_type == ParamType::Bars && value.fract() != 0.0 {
      return Err(PipelineError::InvalidValue("bar count must be a whole number"));
    }
    Ok(())
  }
}

// ============================================================
// PARAMETERIZED GROUP TRAIT
// ============================================================

/// Condition groups that can be built from a parameter map
pub trait ParameterizedGroup: Sized {
  fn param_meta() -> &'static [ParamMeta];

  /// Missing parameters take their defaults; present ones are range checked.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;
}

static COIL_PARAMS: &[ParamMeta] = &[
  ParamMeta::percent("max_width_pct", 3.0, (0.5, 10.0, 0.5), "Maximum bundle width in percent"),
  ParamMeta::ratio(
    "max_volatility_ratio",
    1.2,
    (0.5, 3.0, 0.1),
    "Maximum true range over ATR",
  ),
  ParamMeta::bars("min_persistence", 10.0, (0.0, 50.0, 1.0), "Minimum coiled bars in a row"),
];

static SLOPE_PARAMS: &[ParamMeta] = &[
  ParamMeta::percent("min_slope_pct", 0.0, (-1.0, 1.0, 0.05), "Minimum moving-average slope"),
  ParamMeta::percent("tolerance_pct", 0.0, (0.0, 0.5, 0.05), "Slack applied to slope bounds"),
];

impl ParameterizedGroup for CoilGroup {
  fn param_meta() -> &'static [ParamMeta] {
    COIL_PARAMS
  }

  fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    Ok(Self {
      max_width_pct: get_checked(params, &COIL_PARAMS[0])?,
      max_volatility_ratio: get_checked(params, &COIL_PARAMS[1])?,
      min_persistence: get_checked(params, &COIL_PARAMS[2])? as usize,
    })
  }
}

/// Single-slope trend group builder used by sweeps
pub fn trend_with_params(ma: MaSpec, params: &HashMap<&str, f64>) -> Result<TrendGroup> {
  let min = get_checked(params, &SLOPE_PARAMS[0])?;
  let tolerance = get_checked(params, &SLOPE_PARAMS[1])?;
  Ok(TrendGroup::new(vec![SlopeRule::at_least(ma, min)]).tolerance(tolerance))
}

pub fn slope_param_meta() -> &'static [ParamMeta] {
  SLOPE_PARAMS
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Value for `meta` from `params`, falling back to the default
pub fn get_checked(params: &HashMap<&str, f64>, meta: &ParamMeta) -> Result<f64> {
  let value = params.get(meta.name).copied().unwrap_or(meta.default);
  meta.validate(value)?;
  Ok(value)
}

/// Cartesian product of the grids of `metas`, one map per combination
pub fn parameter_grid(metas: &'static [ParamMeta]) -> Vec<HashMap<&'static str, f64>> {
  metas.iter().fold(vec![HashMap::new()], |acc, meta| {
    let grid = meta.generate_grid();
    acc
      .into_iter()
      .flat_map(|combo| {
        grid.iter().map(move |&v| {
          let mut next = combo.clone();
          next.insert(meta.name, v);
          next
        })
      })
      .collect()
  })
}

// ============================================================
// TESTS
// ============================================================
