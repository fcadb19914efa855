//! SQLite price data adapter.

use crate::domain::error::QuantdeskError;
use crate::domain::price::PriceBar;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const DEFAULT_POOL_SIZE: i64 = 4;

/// Reads `[database] pool_size`, which must be at least one connection.
pub(crate) fn pool_size(config: &dyn ConfigPort) -> Result<u32, QuantdeskError> {
    let size = config.get_int("database", "pool_size", DEFAULT_POOL_SIZE);
    u32::try_from(size)
        .ok()
        .filter(|size| *size >= 1)
        .ok_or_else(|| QuantdeskError::ConfigInvalid {
            section: "database".into(),
            key: "pool_size".into(),
            reason: format!("must be a positive connection count, got {size}"),
        })
}

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantdeskError> {
        let db_path = config.require_string("database", "path")?;
        let pool_size = pool_size(config)?;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, QuantdeskError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), QuantdeskError> {
        let conn = self.pool.get()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS prices (
                symbol TEXT NOT NULL,
                time TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (symbol, time)
            );
            CREATE INDEX IF NOT EXISTS idx_prices_time ON prices(time);",
        )?;

        Ok(())
    }

    /// Upserts bars in one transaction. Returns the number written.
    pub fn insert_bars(&self, bars: &[PriceBar]) -> Result<usize, QuantdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO prices (symbol, time, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    bar.symbol,
                    bar.time,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )?;
        }

        tx.commit()?;
        Ok(bars.len())
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<PriceBar>, QuantdeskError> {
        let conn = self.pool.get()?;

        let query = "SELECT symbol, time, open, high, low, close, volume
                     FROM prices
                     WHERE symbol = ?1 AND time >= ?2 AND time <= ?3
                     ORDER BY time ASC";

        let mut stmt = conn.prepare(query)?;

        let rows = stmt.query_map(params![symbol, start, end], |row| {
            Ok(PriceBar {
                symbol: row.get(0)?,
                time: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                volume: row.get(6)?,
            })
        })?;

        let mut bars = Vec::new();
        for row in rows {
            bars.push(row?);
        }

        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, QuantdeskError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM prices ORDER BY symbol")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }

        Ok(symbols)
    }
}
