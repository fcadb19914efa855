//! Simple Moving Average.
//!
//! SMA(n)[i] = sum(C[i-j] for j in 0..n) / n
//! Warmup: first (n-1) bars are invalid. A zero period never becomes valid.

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType};
use crate::domain::price::PriceBar;

pub fn calculate_sma(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let mut window_sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        window_sum += bar.close;
        if period > 0 && i >= period {
            window_sum -= bars[i - period].close;
        }

        let valid = period > 0 && i + 1 >= period;
        let value = if valid {
            // Re-sum the window periodically to stop drift on long series.
            if i % 1024 == 0 {
                window_sum = bars[i + 1 - period..=i].iter().map(|b| b.close).sum();
            }
            window_sum / period as f64
        } else {
            0.0
        };

        values.push(IndicatorPoint {
            time: bar.time,
            valid,
            value,
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Sma(period),
        values,
    }
}
