//! Rolling standard deviation.
//!
//! Sample standard deviation over n closing prices (divides by n-1), the
//! estimator the mean-reversion bands are defined with.
//! STDDEV(n)[i] = sqrt(sum((C[i-j] - SMA(n)[i])^2 for j in 0..n) / (n - 1))
//! Warmup: first (n-1) bars are invalid. Periods below 2 never become valid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::price::PriceBar;

pub fn calculate_stddev(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let warmup = period.saturating_sub(1);

    for i in 0..bars.len() {
        let time = bars[i].time;
        let valid = period >= 2 && i >= warmup;

        let value = if valid {
            let start = i + 1 - period;
            let window = &bars[start..=i];

            let mean: f64 = window.iter().map(|b| b.close).sum::<f64>() / period as f64;

            let variance: f64 = window
                .iter()
                .map(|b| {
                    let diff = b.close - mean;
                    diff * diff
                })
                .sum::<f64>()
                / (period - 1) as f64;

            variance.sqrt()
        } else {
            0.0
        };

        values.push(IndicatorPoint { time, valid, value });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Stddev(period),
        values,
    }
}
