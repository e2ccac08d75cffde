//! Integration tests for the three-stage pipeline.

use coilspring::prelude::*;
use coilspring::report::{self, Presentation};

fn bars(tf: Timeframe, n: usize, close: impl Fn(usize) -> f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let c = close(i);
            Bar::new(i as i64 * tf.millis(), c, c + 0.5, c - 0.5, c, 1_000.0)
        })
        .collect()
}

/// Slow, steady drift upward: tight bundle, calm ranges, positive slopes
fn drifting(tf: Timeframe) -> Vec<Bar> {
    bars(tf, 300, |i| 100.0 + 0.01 * i as f64)
}

/// Compounding 2% per bar: averages fan out but keep rising
fn breakout(tf: Timeframe) -> Vec<Bar> {
    (0..200)
        .map(|i| {
            let c = 100.0 * 1.02_f64.powi(i as i32);
            Bar::new(i as i64 * tf.millis(), c, c * 1.001, c * 0.999, c, 1_000.0)
        })
        .collect()
}

fn defaults() -> Pipeline {
    PipelineBuilder::new()
        .with_coil_spring_defaults()
        .build()
        .unwrap()
}

#[test]
fn test_all_stages_pass_on_steady_drift() {
    let (h1, h4, d1) = (
        drifting(Timeframe::H1),
        drifting(Timeframe::H4),
        drifting(Timeframe::D1),
    );
    let input = SymbolBars::new("BTC/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h4)
        .with(Timeframe::D1, &d1);

    let verdict = defaults().evaluate_bars(&input).unwrap();

    assert!(verdict.passed);
    assert!(verdict
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Passed));

    let coil = verdict.stage("coil_1h").unwrap();
    let snap = coil.snapshot.as_ref().unwrap();
    assert!(snap.bundle_width_pct.unwrap() < 3.0);
    assert!(snap.coil_persistence.unwrap() >= 10);
}

#[test]
fn test_stage_two_passes_on_turning_up_alone() {
    let h4 = breakout(Timeframe::H4);
    let input = SymbolBars::new("SOL/USDT").with(Timeframe::H4, &h4);

    let pipeline = PipelineBuilder::new()
        .with_coil_spring_defaults()
        .disable("coil_1h")
        .disable("confirm_1d")
        .build()
        .unwrap();
    let verdict = pipeline.evaluate_bars(&input).unwrap();

    let stage = verdict.stage("match_4h").unwrap();
    assert_eq!(stage.status, StageStatus::Passed);
    assert_eq!(stage.group(ConditionGroup::Coil).unwrap().outcome, Outcome::Fail);
    assert_eq!(stage.group(ConditionGroup::Trend).unwrap().outcome, Outcome::Pass);

    let width = &stage.group(ConditionGroup::Coil).unwrap().checks[0];
    assert_eq!(width.name, "bundle_width_pct");
    assert_eq!(width.outcome, Outcome::Fail);

    assert!(verdict.passed);
    assert_eq!(verdict.enabled_stages().count(), 1);
    assert_eq!(verdict.stage("coil_1h").unwrap().status, StageStatus::Disabled);
}

#[test]
fn test_all_mode_fails_on_breakout() {
    // the same bars fail a stage that demands both groups
    let h4 = breakout(Timeframe::H4);
    let input = SymbolBars::new("SOL/USDT").with(Timeframe::H4, &h4);
    let pipeline = PipelineBuilder::new()
        .with_coil_spring_defaults()
        .disable("coil_1h")
        .disable("confirm_1d")
        .configure("match_4h", |s| s.mode = CombineMode::All)
        .build()
        .unwrap();

    let verdict = pipeline.evaluate_bars(&input).unwrap();
    assert_eq!(verdict.stage("match_4h").unwrap().status, StageStatus::Failed);
    assert!(!verdict.passed);
}

#[test]
fn test_short_history_is_insufficient_not_failed() {
    let d1 = bars(Timeframe::D1, 50, |i| 100.0 + i as f64);
    let h1 = drifting(Timeframe::H1);
    let h4 = drifting(Timeframe::H4);
    let input = SymbolBars::new("NEW/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h4)
        .with(Timeframe::D1, &d1);

    let verdict = defaults().evaluate_bars(&input).unwrap();
    let confirm = verdict.stage("confirm_1d").unwrap();

    assert_eq!(confirm.status, StageStatus::Insufficient);
    assert!(!confirm.passed());
    let insufficient = confirm.insufficient.unwrap();
    assert_eq!((insufficient.need, insufficient.got), (150, 50));
    assert!(confirm.snapshot.is_none());

    // the other stages are still evaluated in full
    assert_eq!(verdict.stage("coil_1h").unwrap().status, StageStatus::Passed);
    assert!(!verdict.passed);
}

#[test]
fn test_disabling_a_stage_leaves_others_unchanged() {
    let h1 = drifting(Timeframe::H1);
    let h4 = breakout(Timeframe::H4);
    let d1 = bars(Timeframe::D1, 300, |i| 200.0 - 0.1 * i as f64);
    let input = SymbolBars::new("ETH/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h4)
        .with(Timeframe::D1, &d1);

    let full = defaults().evaluate_bars(&input).unwrap();
    assert_eq!(full.stage("confirm_1d").unwrap().status, StageStatus::Failed);
    assert!(!full.passed);

    // turning up without a coil still carries the any-mode stage
    let turning = full.stage("match_4h").unwrap();
    assert_eq!(turning.status, StageStatus::Passed);
    assert_eq!(turning.group(ConditionGroup::Coil).unwrap().outcome, Outcome::Fail);
    assert_eq!(turning.group(ConditionGroup::Trend).unwrap().outcome, Outcome::Pass);

    let relaxed = PipelineBuilder::new()
        .with_coil_spring_defaults()
        .disable("confirm_1d")
        .build()
        .unwrap()
        .evaluate_bars(&input)
        .unwrap();

    for name in ["coil_1h", "match_4h"] {
        assert_eq!(full.stage(name), relaxed.stage(name));
    }
    assert!(relaxed.passed);
}

#[test]
fn test_evaluation_is_deterministic() {
    let h1 = drifting(Timeframe::H1);
    let h4 = breakout(Timeframe::H4);
    let input = SymbolBars::new("BTC/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h4);
    let pipeline = defaults();

    let first = pipeline.evaluate_bars(&input).unwrap();
    let second = pipeline.evaluate_bars(&input).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_integrity_errors_name_the_series() {
    let h1 = drifting(Timeframe::H1);
    let mut h4 = drifting(Timeframe::H4);
    h4[10].ts = h4[9].ts;
    let input = SymbolBars::new("BAD/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h4);

    let err = defaults().evaluate_bars(&input).unwrap_err();
    assert_eq!(
        err,
        PipelineError::DataIntegrity {
            symbol: "BAD/USDT".into(),
            timeframe: Timeframe::H4,
            index: 10,
            reason: "duplicate timestamp",
        }
    );
    assert!(!err.is_config());
}

#[test]
fn test_parallel_evaluation_keeps_order_and_collects_errors() {
    let good = drifting(Timeframe::H1);
    let mut bad = drifting(Timeframe::H1);
    bad[5].low = bad[5].high + 1.0;

    let symbols = ["AAA/USDT", "BBB/USDT", "CCC/USDT", "DDD/USDT"];
    let inputs: Vec<SymbolBars<'_, Bar>> = symbols
        .iter()
        .map(|&s| {
            let bars = if s == "CCC/USDT" { &bad } else { &good };
            SymbolBars::new(s).with(Timeframe::H1, bars)
        })
        .collect();

    let pipeline = defaults();
    let (verdicts, errors) = evaluate_parallel(&pipeline, inputs);

    let evaluated: Vec<_> = verdicts.iter().map(|v| v.symbol.as_str()).collect();
    assert_eq!(evaluated, ["AAA/USDT", "BBB/USDT", "DDD/USDT"]);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].symbol, "CCC/USDT");

    // 4h and 1d series were never supplied
    assert!(verdicts.iter().all(|v| !v.passed));
}

#[test]
fn test_benchmark_flag_only_changes_presentation() {
    let h1 = drifting(Timeframe::H1);
    let h4 = breakout(Timeframe::H4);
    let d1 = bars(Timeframe::D1, 300, |i| 200.0 - 0.1 * i as f64);
    let passing = SymbolBars::new("BTC/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h1)
        .with(Timeframe::D1, &h1);
    let failing = SymbolBars::new("ETH/USDT")
        .with(Timeframe::H1, &h1)
        .with(Timeframe::H4, &h4)
        .with(Timeframe::D1, &d1);

    let filtered = defaults();
    let benchmark = PipelineBuilder::new()
        .with_coil_spring_defaults()
        .benchmark(true)
        .build()
        .unwrap();

    let (a, _) = evaluate_parallel(&filtered, vec![passing.clone(), failing.clone()]);
    let (b, _) = evaluate_parallel(&benchmark, vec![passing, failing]);

    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.stages, y.stages);
        assert_eq!(x.passed, y.passed);
    }

    let shown_a = report::present(&a, Presentation::of(&a[0]));
    let shown_b = report::present(&b, Presentation::of(&b[0]));
    assert_eq!(shown_a.len(), 1);
    assert_eq!(shown_b.len(), 2);
    assert_eq!(report::all_pass_watchlist(&b), ["BTC/USDT"]);
    assert_eq!(
        report::exchange_list("BINANCE", report::stage_watchlist(&b, "coil_1h")),
        "BINANCE:BTCUSDT,BINANCE:ETHUSDT"
    );
}

#[test]
fn test_pipeline_from_toml() {
    let toml = r#"
[[stages]]
name = "coil_1h"
timeframe = "1h"

[stages.features]
moving_averages = ["EMA21", "EMA40", "SMA50"]
bundle = ["EMA21", "EMA40", "SMA50"]
slope_lookback = 24

[stages.coil]
max_width_pct = 2.0
max_volatility_ratio = 1.5
min_persistence = 5
"#;
    let config = PipelineConfig::from_toml_str(toml).unwrap();
    let pipeline = Pipeline::from_config(config).unwrap();

    let h1 = drifting(Timeframe::H1);
    let verdict = pipeline
        .evaluate_bars(&SymbolBars::new("BTC/USDT").with(Timeframe::H1, &h1))
        .unwrap();
    assert!(verdict.passed);
    assert!(!verdict.benchmark);
}

#[test]
fn test_invalid_config_fails_before_evaluation() {
    let toml = r#"
[[stages]]
name = "match_4h"
timeframe = "4h"
mode = "any"

[stages.features]
moving_averages = ["EMA21", "SMA50"]
bundle = ["EMA21", "SMA50"]
slope_lookback = 20

[stages.trend]
slopes = [{ ma = "EMA21", min_pct = 0.0 }]
"#;
    let config = PipelineConfig::from_toml_str(toml).unwrap();
    let err = Pipeline::from_config(config).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("match_4h"));
}

#[test]
fn test_verdict_json_shape() {
    let h1 = drifting(Timeframe::H1);
    let verdict = defaults()
        .evaluate_bars(&SymbolBars::new("BTC/USDT").with(Timeframe::H1, &h1))
        .unwrap();
    let json = serde_json::to_value(&verdict).unwrap();

    assert_eq!(json["symbol"], "BTC/USDT");
    assert_eq!(json["passed"], false);
    assert_eq!(json["stages"][0]["name"], "coil_1h");
    assert_eq!(json["stages"][0]["status"], "passed");
    assert_eq!(json["stages"][0]["groups"][0]["group"], "coil");
    assert_eq!(json["stages"][0]["groups"][1]["checks"][0]["name"], "slope_pct[EMA21]");
    assert_eq!(json["stages"][0]["groups"][1]["checks"][0]["bound"], "at_least");
    assert_eq!(json["stages"][1]["status"], "insufficient");
    assert_eq!(json["stages"][1]["insufficient"]["got"], 0);
}
