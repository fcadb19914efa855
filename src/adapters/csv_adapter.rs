//! CSV file price data adapter.
//!
//! One file per symbol, `<base_path>/<SYMBOL>.csv`, with the header
//! `time,open,high,low,close,volume`. Volume may be blank (FX quotes).

use crate::domain::error::QuantdeskError;
use crate::domain::price::{PriceBar, parse_timestamp};
use crate::ports::data_port::DataPort;
use chrono::NaiveDateTime;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    /// Parses every row of a price CSV, in file order.
    pub fn read_file(symbol: &str, content: &str) -> Result<Vec<PriceBar>, QuantdeskError> {
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| QuantdeskError::Database {
                reason: format!("CSV parse error: {}", e),
            })?;
            // +2: header row and 1-based numbering
            let row = line + 2;

            let time_str = record.get(0).ok_or_else(|| QuantdeskError::Database {
                reason: format!("row {row}: missing time column"),
            })?;
            let time = parse_timestamp(time_str).ok_or_else(|| QuantdeskError::Database {
                reason: format!("row {row}: invalid timestamp {time_str:?}"),
            })?;

            let price = |index: usize, name: &str| -> Result<f64, QuantdeskError> {
                record
                    .get(index)
                    .ok_or_else(|| QuantdeskError::Database {
                        reason: format!("row {row}: missing {name} column"),
                    })?
                    .trim()
                    .parse()
                    .map_err(|e| QuantdeskError::Database {
                        reason: format!("row {row}: invalid {name} value: {e}"),
                    })
            };

            let volume = match record.get(5).map(str::trim) {
                None | Some("") => 0,
                Some(v) => v
                    .parse::<f64>()
                    .map(|v| v as i64)
                    .map_err(|e| QuantdeskError::Database {
                        reason: format!("row {row}: invalid volume value: {e}"),
                    })?,
            };

            bars.push(PriceBar {
                symbol: symbol.to_string(),
                time,
                open: price(1, "open")?,
                high: price(2, "high")?,
                low: price(3, "low")?,
                close: price(4, "close")?,
                volume,
            });
        }

        Ok(bars)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, QuantdeskError> {
        let path = self.csv_path(symbol);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(QuantdeskError::NoData {
                    symbol: symbol.to_string(),
                });
            }
            Err(e) => {
                return Err(QuantdeskError::Database {
                    reason: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };

        let mut bars: Vec<PriceBar> = Self::read_file(symbol, &content)?
            .into_iter()
            .filter(|b| b.time >= start && b.time <= end)
            .collect();

        bars.sort_by_key(|b| b.time);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, QuantdeskError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| QuantdeskError::Database {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| QuantdeskError::Database {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if let Some(symbol) = name_str.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
