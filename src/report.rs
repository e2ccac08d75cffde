//! Presentation adapter
//!
//! Evaluation always returns a full verdict for every symbol. Everything that
//! decides what a reader sees (keeping only passers, ordering, watchlists)
//! happens here, on finished verdicts.

use std::cmp::Ordering;

use crate::{pipeline::PipelineVerdict, stage::StageStatus};

/// Which verdicts a report keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presentation {
    /// Only symbols passing every enabled stage
    #[default]
    Filtered,
    /// Every symbol, passing or not
    Benchmark,
}

impl Presentation {
    /// The presentation a verdict asks for through its `benchmark` flag
    pub fn of(verdict: &PipelineVerdict) -> Self {
        if verdict.benchmark {
            Presentation::Benchmark
        } else {
            Presentation::Filtered
        }
    }

    #[inline]
    pub fn keeps(self, verdict: &PipelineVerdict) -> bool {
        match self {
            Presentation::Filtered => verdict.passed,
            Presentation::Benchmark => true,
        }
    }
}

/// Flat, table-friendly view of one verdict
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReportRow {
    pub symbol: String,
    pub passed: bool,
    /// (stage name, status) in configuration order
    pub stages: Vec<(String, StageStatus)>,
    pub close: Option<f64>,
    pub bundle_width_pct: Option<f64>,
    pub volatility_ratio: Option<f64>,
    pub coil_persistence: Option<usize>,
    /// First defined slope of the headline stage, in moving-average order
    pub slope_pct: Option<f64>,
}

impl ReportRow {
    /// Headline metrics come from the first stage that produced a snapshot.
    pub fn from_verdict(verdict: &PipelineVerdict) -> Self {
        let snapshot = verdict.stages.iter().find_map(|s| s.snapshot.as_ref());
        Self {
            symbol: verdict.symbol.clone(),
            passed: verdict.passed,
            stages: verdict
                .stages
                .iter()
                .map(|s| (s.name.clone(), s.status))
                .collect(),
            close: snapshot.map(|s| s.close),
            bundle_width_pct: snapshot.and_then(|s| s.bundle_width_pct),
            volatility_ratio: snapshot.and_then(|s| s.volatility_ratio),
            coil_persistence: snapshot.and_then(|s| s.coil_persistence),
            slope_pct: snapshot.and_then(|s| s.slopes.values().find_map(|v| *v)),
        }
    }
}

/// Passers first, then tighter bundles, then symbol. Rows without a width sort last.
pub fn rank(rows: &mut [ReportRow]) {
    rows.sort_by(|a, b| {
        b.passed
            .cmp(&a.passed)
            .then_with(|| cmp_width(a.bundle_width_pct, b.bundle_width_pct))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

fn cmp_width(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Keep, flatten and rank verdicts for display
pub fn present(verdicts: &[PipelineVerdict], presentation: Presentation) -> Vec<ReportRow> {
    let mut rows: Vec<ReportRow> = verdicts
        .iter()
        .filter(|v| presentation.keeps(v))
        .map(ReportRow::from_verdict)
        .collect();
    rank(&mut rows);
    rows
}

/// Symbols whose stage `name` passed. Disabled stages list nobody.
pub fn stage_watchlist<'a>(verdicts: &'a [PipelineVerdict], name: &str) -> Vec<&'a str> {
    verdicts
        .iter()
        .filter(|v| v.stage(name).is_some_and(|s| s.status == StageStatus::Passed))
        .map(|v| v.symbol.as_str())
        .collect()
}

/// Symbols passing every enabled stage
pub fn all_pass_watchlist(verdicts: &[PipelineVerdict]) -> Vec<&str> {
    verdicts
        .iter()
        .filter(|v| v.passed)
        .map(|v| v.symbol.as_str())
        .collect()
}

/// `EXCHANGE:BASEQUOTE` entries joined by commas, e.g. `BINANCE:BTCUSDT,BINANCE:ETHUSDT`
pub fn exchange_list<'a>(exchange: &str, symbols: impl IntoIterator<Item = &'a str>) -> String {
    symbols
        .into_iter()
        .map(|s| format!("{exchange}:{}", s.replace('/', "")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Stage-level pass counts, in configuration order
pub fn stage_pass_counts(verdicts: &[PipelineVerdict]) -> Vec<(String, usize)> {
    let Some(first) = verdicts.first() else {
        return Vec::new();
    };
    first
        .stages
        .iter()
        .map(|stage| {
            let passed = verdicts
                .iter()
                .filter_map(|v| v.stage(&stage.name))
                .filter(|s| s.status == StageStatus::Passed)
                .count();
            (stage.name.clone(), passed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        stage::{CombineMode, StageVerdict},
        Timeframe,
    };

    fn stage(name: &str, status: StageStatus) -> StageVerdict {
        StageVerdict {
            name: name.into(),
            timeframe: Timeframe::H1,
            mode: CombineMode::All,
            status,
            groups: Vec::new(),
            snapshot: None,
            insufficient: None,
        }
    }

    fn verdict(symbol: &str, coil: StageStatus, confirm: StageStatus) -> PipelineVerdict {
        let stages = vec![stage("coil_1h", coil), stage("confirm_1d", confirm)];
        let passed = stages.iter().filter(|s| s.is_enabled()).all(|s| s.passed());
        PipelineVerdict {
            symbol: symbol.into(),
            stages,
            passed,
            benchmark: false,
        }
    }

    fn sample() -> Vec<PipelineVerdict> {
        use StageStatus::*;
        vec![
            verdict("SOL/USDT", Passed, Failed),
            verdict("BTC/USDT", Passed, Passed),
            verdict("ETH/USDT", Failed, Disabled),
            verdict("ADA/USDT", Passed, Disabled),
        ]
    }

    fn row(symbol: &str, passed: bool, width: Option<f64>) -> ReportRow {
        ReportRow {
            symbol: symbol.into(),
            passed,
            stages: Vec::new(),
            close: None,
            bundle_width_pct: width,
            volatility_ratio: None,
            coil_persistence: None,
            slope_pct: None,
        }
    }

    #[test]
    fn test_filtered_vs_benchmark() {
        let verdicts = sample();
        let filtered = present(&verdicts, Presentation::Filtered);
        let symbols: Vec<_> = filtered.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, ["ADA/USDT", "BTC/USDT"]);

        let all = present(&verdicts, Presentation::Benchmark);
        assert_eq!(all.len(), 4);
        assert!(all[0].passed && all[1].passed);
        assert!(!all[2].passed && !all[3].passed);
    }

    #[test]
    fn test_rank_order() {
        let mut rows = vec![
            row("C", false, Some(1.0)),
            row("B", true, None),
            row("A", true, Some(2.5)),
            row("D", true, Some(2.5)),
            row("E", true, Some(0.5)),
        ];
        rank(&mut rows);
        let order: Vec<_> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, ["E", "A", "D", "B", "C"]);
    }

    #[test]
    fn test_watchlists() {
        let verdicts = sample();
        assert_eq!(
            stage_watchlist(&verdicts, "coil_1h"),
            ["SOL/USDT", "BTC/USDT", "ADA/USDT"]
        );
        assert_eq!(stage_watchlist(&verdicts, "confirm_1d"), ["BTC/USDT"]);
        assert!(stage_watchlist(&verdicts, "match_4h").is_empty());
        assert_eq!(all_pass_watchlist(&verdicts), ["BTC/USDT", "ADA/USDT"]);
    }

    #[test]
    fn test_exchange_list() {
        let list = exchange_list("BINANCE", ["BTC/USDT", "ETH/USDT"]);
        assert_eq!(list, "BINANCE:BTCUSDT,BINANCE:ETHUSDT");
        assert_eq!(exchange_list("BINANCE", Vec::<&str>::new()), "");
    }

    #[test]
    fn test_stage_pass_counts() {
        let counts = stage_pass_counts(&sample());
        assert_eq!(
            counts,
            vec![("coil_1h".to_string(), 3), ("confirm_1d".to_string(), 1)]
        );
    }

    #[test]
    fn test_presentation_follows_flag() {
        let mut v = verdict("X", StageStatus::Failed, StageStatus::Disabled);
        assert_eq!(Presentation::of(&v), Presentation::Filtered);
        v.benchmark = true;
        assert_eq!(Presentation::of(&v), Presentation::Benchmark);
        assert!(Presentation::of(&v).keeps(&v));
    }
}
