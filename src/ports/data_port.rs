//! Price data access port trait.

use crate::domain::error::QuantdeskError;
use crate::domain::price::PriceBar;
use chrono::NaiveDateTime;

pub trait DataPort {
    /// Bars for `symbol` with `start <= time <= end`, oldest first.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, QuantdeskError>;

    fn list_symbols(&self) -> Result<Vec<String>, QuantdeskError>;
}
