//! Vectorised log-return backtests for SMA crossover and mean reversion.
//!
//! Both strategies produce a position series (+1 long, -1 short, 0 flat) over
//! the rows where their indicators are valid. The position held during row i
//! is the one decided at row i-1; every position change costs
//! `transaction_cost` (in log-return units) per unit traded.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::error::QuantdeskError;
use crate::domain::indicator::{calculate_sma, calculate_stddev};
use crate::domain::price::{PriceBar, format_timestamp};
use crate::domain::strategy::{MeanReversionParams, Parameters, SmaParams, StrategyKind};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_TRANSACTION_COST: f64 = 0.0001;
pub const DEFAULT_RESULTS_TAIL: usize = 100;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub transaction_cost: f64,
    /// Number of trailing rows kept in the result series.
    pub results_tail: usize,
}

impl BacktestConfig {
    /// Reads `[backtest] transaction_cost` and `results_tail`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantdeskError> {
        let transaction_cost =
            config.get_double("backtest", "transaction_cost", DEFAULT_TRANSACTION_COST);
        if !(0.0..1.0).contains(&transaction_cost) {
            return Err(QuantdeskError::ConfigInvalid {
                section: "backtest".into(),
                key: "transaction_cost".into(),
                reason: "must be in [0, 1)".into(),
            });
        }
        let results_tail = config.get_int("backtest", "results_tail", DEFAULT_RESULTS_TAIL as i64);
        Ok(Self {
            transaction_cost,
            results_tail: results_tail.max(0) as usize,
        })
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            transaction_cost: DEFAULT_TRANSACTION_COST,
            results_tail: DEFAULT_RESULTS_TAIL,
        }
    }
}

/// Cumulative return series for charting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSeries {
    pub dates: Vec<String>,
    pub buy_and_hold: Vec<f64>,
    pub strategy: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestOutcome {
    /// Final gross value of 1 unit invested in the strategy.
    pub performance: f64,
    /// `performance` minus the buy-and-hold multiple.
    pub outperformance: f64,
    pub results: Option<ResultsSeries>,
}

/// Persisted backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backtest {
    pub id: i64,
    pub user_id: i64,
    pub strategy_id: i64,
    pub symbol: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub performance: Option<f64>,
    pub outperformance: Option<f64>,
    pub results_data: Option<ResultsSeries>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewBacktest {
    pub strategy_id: i64,
    pub symbol: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub outcome: BacktestOutcome,
}

pub fn run_backtest(
    kind: StrategyKind,
    parameters: &Parameters,
    bars: &[PriceBar],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, QuantdeskError> {
    match kind {
        StrategyKind::Sma => run_sma(&SmaParams::from_parameters(parameters)?, bars, config),
        StrategyKind::MeanReversion => run_mean_reversion(
            &MeanReversionParams::from_parameters(parameters)?,
            bars,
            config,
        ),
    }
}

pub fn run_sma(
    params: &SmaParams,
    bars: &[PriceBar],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, QuantdeskError> {
    check_data(bars, params.long.max(params.short) + 1)?;

    let short = calculate_sma(bars, params.short);
    let long = calculate_sma(bars, params.long);
    let first = short
        .first_valid()
        .max(long.first_valid())
        .unwrap_or(bars.len())
        .max(1);

    let positions: Vec<f64> = (first..bars.len())
        .map(|i| match (short.get(i), long.get(i)) {
            (Some(s), Some(l)) if s > l => 1.0,
            _ => -1.0,
        })
        .collect();

    evaluate(bars, first, &positions, config)
}

pub fn run_mean_reversion(
    params: &MeanReversionParams,
    bars: &[PriceBar],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, QuantdeskError> {
    check_data(bars, params.sma + 1)?;

    let sma = calculate_sma(bars, params.sma);
    let stddev = calculate_stddev(bars, params.sma);
    let first = sma.first_valid().unwrap_or(bars.len()).max(1);

    let mut positions = Vec::with_capacity(bars.len() - first);
    let mut held = 0.0;
    let mut prev_distance: Option<f64> = None;

    for i in first..bars.len() {
        let (Some(mean), Some(sd)) = (sma.get(i), stddev.get(i)) else {
            positions.push(held);
            continue;
        };
        let close = bars[i].close;
        let distance = close - mean;

        let crossed = prev_distance.is_some_and(|prev| prev * distance < 0.0);
        if crossed {
            held = 0.0;
        } else if close > mean + params.dev * sd {
            held = -1.0;
        } else if close < mean - params.dev * sd {
            held = 1.0;
        }

        positions.push(held);
        prev_distance = Some(distance);
    }

    evaluate(bars, first, &positions, config)
}

fn check_data(bars: &[PriceBar], minimum: usize) -> Result<(), QuantdeskError> {
    let symbol = bars.first().map(|b| b.symbol.clone()).unwrap_or_default();
    if bars.is_empty() {
        return Err(QuantdeskError::NoData { symbol });
    }
    if bars.len() < minimum {
        return Err(QuantdeskError::InsufficientData {
            symbol,
            bars: bars.len(),
            minimum,
        });
    }
    Ok(())
}

/// Turns a position series starting at bar `first` into cumulative returns.
fn evaluate(
    bars: &[PriceBar],
    first: usize,
    positions: &[f64],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, QuantdeskError> {
    // Row `first` only supplies the initial position.
    let rows = positions.len().saturating_sub(1);
    if rows == 0 {
        return Err(QuantdeskError::InsufficientData {
            symbol: bars.first().map(|b| b.symbol.clone()).unwrap_or_default(),
            bars: bars.len(),
            minimum: first + 2,
        });
    }

    let mut dates = Vec::with_capacity(rows);
    let mut creturns = Vec::with_capacity(rows);
    let mut cstrategy = Vec::with_capacity(rows);
    let mut cum_market = 0.0;
    let mut cum_strategy = 0.0;

    for k in 1..positions.len() {
        let i = first + k;
        let market = (bars[i].close / bars[i - 1].close).ln();
        // The first evaluated row has no previous trade to compare with.
        let traded = if k == 1 {
            0.0
        } else {
            (positions[k] - positions[k - 1]).abs()
        };
        let strategy = positions[k - 1] * market - traded * config.transaction_cost;

        cum_market += market;
        cum_strategy += strategy;
        dates.push(bars[i].time);
        creturns.push(cum_market.exp());
        cstrategy.push(cum_strategy.exp());
    }

    let performance = round6(cum_strategy.exp());
    let outperformance = round6(cum_strategy.exp() - cum_market.exp());

    let tail_start = rows.saturating_sub(config.results_tail);
    let results = (config.results_tail > 0).then(|| ResultsSeries {
        dates: dates[tail_start..].iter().map(format_timestamp).collect(),
        buy_and_hold: creturns[tail_start..].to_vec(),
        strategy: cstrategy[tail_start..].to_vec(),
    });

    Ok(BacktestOutcome {
        performance,
        outperformance,
        results,
    })
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use serde_json::json;

    fn make_bars(prices: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                symbol: "EURUSD".into(),
                time: start + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 0,
            })
            .collect()
    }

    fn no_cost() -> BacktestConfig {
        BacktestConfig {
            transaction_cost: 0.0,
            ..Default::default()
        }
    }

    fn params(value: serde_json::Value) -> Parameters {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn config_defaults() {
        let c = BacktestConfig::default();
        assert!((c.transaction_cost - 0.0001).abs() < f64::EPSILON);
        assert_eq!(c.results_tail, 100);
    }

    #[test]
    fn sma_uptrend_goes_long_and_tracks_market() {
        // Monotonic rise: short SMA above long SMA everywhere valid.
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&prices);
        let out = run_sma(&SmaParams { short: 2, long: 5 }, &bars, &no_cost()).unwrap();

        // first = 4; positions all +1; evaluated rows 5..30
        let expected = prices[29] / prices[4];
        assert_relative_eq!(out.performance, round6(expected), epsilon = 1e-9);
        assert_relative_eq!(out.outperformance, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn sma_downtrend_shorts_and_profits() {
        let prices: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        let bars = make_bars(&prices);
        let out = run_sma(&SmaParams { short: 2, long: 5 }, &bars, &no_cost()).unwrap();

        let market = prices[29] / prices[4];
        assert_relative_eq!(out.performance, round6(1.0 / market), epsilon = 1e-9);
        assert!(out.outperformance > 0.0);
    }

    #[test]
    fn transaction_costs_reduce_performance() {
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + 10.0 * ((i as f64) / 4.0).sin())
            .collect();
        let bars = make_bars(&prices);
        let p = SmaParams { short: 2, long: 6 };
        let free = run_sma(&p, &bars, &no_cost()).unwrap();
        let costly = run_sma(
            &p,
            &bars,
            &BacktestConfig {
                transaction_cost: 0.01,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(costly.performance < free.performance);
    }

    #[test]
    fn results_series_is_tail_limited() {
        let prices: Vec<f64> = (0..40).map(|i| 50.0 + i as f64).collect();
        let bars = make_bars(&prices);
        let config = BacktestConfig {
            transaction_cost: 0.0,
            results_tail: 10,
        };
        let out = run_sma(&SmaParams { short: 2, long: 3 }, &bars, &config).unwrap();
        let results = out.results.unwrap();
        assert_eq!(results.dates.len(), 10);
        assert_eq!(results.buy_and_hold.len(), 10);
        assert_eq!(results.strategy.len(), 10);
        assert_eq!(results.dates.last().unwrap(), "2024-02-09 00:00:00");
        assert_relative_eq!(
            *results.strategy.last().unwrap(),
            out.performance,
            epsilon = 1e-6
        );
    }

    #[test]
    fn zero_tail_drops_results() {
        let prices: Vec<f64> = (0..10).map(|i| 50.0 + i as f64).collect();
        let config = BacktestConfig {
            transaction_cost: 0.0,
            results_tail: 0,
        };
        let out = run_sma(&SmaParams { short: 1, long: 2 }, &make_bars(&prices), &config).unwrap();
        assert!(out.results.is_none());
    }

    #[test]
    fn empty_bars_is_no_data() {
        let err = run_sma(&SmaParams { short: 2, long: 5 }, &[], &no_cost()).unwrap_err();
        assert!(matches!(err, QuantdeskError::NoData { .. }));
    }

    #[test]
    fn short_history_is_insufficient() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0]);
        let err = run_sma(&SmaParams { short: 2, long: 5 }, &bars, &no_cost()).unwrap_err();
        assert!(matches!(
            err,
            QuantdeskError::InsufficientData { bars: 4, .. }
        ));
    }

    #[test]
    fn mean_reversion_buys_dip_and_exits_on_cross() {
        // Flat, a sharp dip below the lower band, then recovery through the mean.
        let bars = make_bars(&[100.0, 100.0, 100.0, 100.0, 100.0, 90.0, 95.0, 104.0, 103.0]);
        let p = MeanReversionParams { sma: 5, dev: 1.0 };
        let out = run_mean_reversion(&p, &bars, &no_cost()).unwrap();

        // Long is entered at the 90 bar, carried through the 95 bar and
        // closed when price crosses back above the mean at 104.
        let expected = (95.0_f64 / 90.0) * (104.0 / 95.0);
        assert_relative_eq!(out.performance, round6(expected), epsilon = 1e-9);
    }

    #[test]
    fn mean_reversion_flat_market_stays_flat() {
        let bars = make_bars(&[100.0; 30]);
        let p = MeanReversionParams { sma: 5, dev: 2.0 };
        let out = run_mean_reversion(&p, &bars, &no_cost()).unwrap();
        assert_relative_eq!(out.performance, 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.outperformance, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn run_backtest_dispatches_on_kind_with_defaults() {
        let prices: Vec<f64> = (0..120).map(|i| 100.0 + i as f64 * 0.5).collect();
        let bars = make_bars(&prices);
        let out = run_backtest(
            StrategyKind::Sma,
            &StrategyKind::Sma.default_parameters(),
            &bars,
            &no_cost(),
        )
        .unwrap();
        assert!(out.performance > 1.0);

        let out = run_backtest(
            StrategyKind::MeanReversion,
            &params(json!({"SMA": 10, "dev": 2})),
            &bars,
            &no_cost(),
        )
        .unwrap();
        assert!(out.performance > 0.0);
    }

    #[test]
    fn run_backtest_rejects_invalid_parameters() {
        let bars = make_bars(&[1.0; 10]);
        let err = run_backtest(
            StrategyKind::Sma,
            &params(json!({"SMA_S": 9, "SMA_L": 3})),
            &bars,
            &no_cost(),
        )
        .unwrap_err();
        assert!(matches!(err, QuantdeskError::InvalidParameters { .. }));
    }

    #[test]
    fn round6_rounds_half_away() {
        assert_eq!(round6(1.23456749), 1.234567);
        assert_eq!(round6(1.2345678), 1.234568);
    }
}
