//! SQLite account store: users, strategies and backtest runs.

use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::domain::backtest::{Backtest, NewBacktest, ResultsSeries};
use crate::domain::error::QuantdeskError;
use crate::domain::strategy::{NewStrategy, Parameters, Strategy, StrategyKind};
use crate::domain::subscription::{SubscriptionState, Tier};
use crate::domain::user::{NewUser, User};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::AccountStore;

use super::sqlite_adapter::pool_size;

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at, subscription_tier, \
     subscription_start_date, subscription_end_date, stripe_customer_id, stripe_subscription_id";

const STRATEGY_COLUMNS: &str =
    "id, user_id, name, strategy_type, parameters, created_at, updated_at, is_active";

const BACKTEST_COLUMNS: &str = "id, user_id, strategy_id, symbol, start_date, end_date, \
     performance, outperformance, results_data, created_at";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

fn manager(manager: SqliteConnectionManager) -> SqliteConnectionManager {
    manager.with_init(|conn: &mut Connection| conn.execute_batch("PRAGMA foreign_keys = ON;"))
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, QuantdeskError> {
        let db_path = config.require_string("database", "path")?;
        let pool_size = pool_size(config)?;

        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager(SqliteConnectionManager::file(&db_path)))?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, QuantdeskError> {
        let pool = Pool::builder()
            .max_size(1)
            .build(manager(SqliteConnectionManager::memory()))?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), QuantdeskError> {
        let conn = self.pool.get()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                subscription_tier TEXT NOT NULL DEFAULT 'free',
                subscription_start_date TEXT,
                subscription_end_date TEXT,
                stripe_customer_id TEXT,
                stripe_subscription_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_users_subscription ON users(stripe_subscription_id);

            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                strategy_type TEXT NOT NULL,
                parameters TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_strategies_user ON strategies(user_id);

            CREATE TABLE IF NOT EXISTS backtests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                strategy_id INTEGER NOT NULL REFERENCES strategies(id) ON DELETE CASCADE,
                symbol TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                performance REAL,
                outperformance REAL,
                results_data TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_backtests_user_created ON backtests(user_id, created_at);",
        )?;

        Ok(())
    }
}

fn conversion_error(column: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let tier: String = row.get(5)?;
    let tier: Tier = tier.parse().map_err(|e| conversion_error(5, e))?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
        subscription: SubscriptionState {
            tier,
            start_date: row.get(6)?,
            end_date: row.get(7)?,
            stripe_subscription_id: row.get(9)?,
        },
        stripe_customer_id: row.get(8)?,
    })
}

fn strategy_from_row(row: &Row<'_>) -> rusqlite::Result<Strategy> {
    let kind: String = row.get(3)?;
    let kind: StrategyKind = kind.parse().map_err(|e| conversion_error(3, e))?;
    let parameters: String = row.get(4)?;
    let parameters: Parameters =
        serde_json::from_str(&parameters).map_err(|e| conversion_error(4, e))?;

    Ok(Strategy {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        kind,
        parameters,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        is_active: row.get(7)?,
    })
}

fn backtest_from_row(row: &Row<'_>) -> rusqlite::Result<Backtest> {
    let results: Option<String> = row.get(8)?;
    let results_data = match results {
        Some(text) => Some(
            serde_json::from_str::<ResultsSeries>(&text).map_err(|e| conversion_error(8, e))?,
        ),
        None => None,
    };

    Ok(Backtest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        strategy_id: row.get(2)?,
        symbol: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        performance: row.get(6)?,
        outperformance: row.get(7)?,
        results_data,
        created_at: row.get(9)?,
    })
}

/// Maps a UNIQUE violation on `users` to the message shown at registration.
fn registration_conflict(err: rusqlite::Error) -> QuantdeskError {
    let reason = match &err {
        rusqlite::Error::SqliteFailure(failure, Some(message))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            if message.contains("users.username") {
                Some("Username already exists")
            } else if message.contains("users.email") {
                Some("Email already registered")
            } else {
                None
            }
        }
        _ => None,
    };

    match reason {
        Some(reason) => QuantdeskError::Conflict {
            reason: reason.into(),
        },
        None => err.into(),
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, QuantdeskError> {
    serde_json::to_string(value).map_err(QuantdeskError::query)
}

impl AccountStore for SqliteStore {
    fn create_user(&self, user: &NewUser) -> Result<User, QuantdeskError> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().naive_utc();

        conn.execute(
            "INSERT INTO users (username, email, password_hash, created_at, subscription_tier)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.username,
                user.email,
                user.password_hash,
                now,
                Tier::Free.as_str()
            ],
        )
        .map_err(registration_conflict)?;

        let id = conn.last_insert_rowid();
        Ok(User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            created_at: now,
            subscription: SubscriptionState::default(),
            stripe_customer_id: None,
        })
    }

    fn find_user(&self, id: i64) -> Result<Option<User>, QuantdeskError> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, QuantdeskError> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn find_user_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<User>, QuantdeskError> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE stripe_subscription_id = ?1"),
                params![subscription_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn update_subscription(
        &self,
        user_id: i64,
        subscription: &SubscriptionState,
    ) -> Result<(), QuantdeskError> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE users
             SET subscription_tier = ?2, subscription_start_date = ?3,
                 subscription_end_date = ?4, stripe_subscription_id = ?5
             WHERE id = ?1",
            params![
                user_id,
                subscription.tier.as_str(),
                subscription.start_date,
                subscription.end_date,
                subscription.stripe_subscription_id
            ],
        )?;
        if updated == 0 {
            return Err(QuantdeskError::NotFound { entity: "User" });
        }
        Ok(())
    }

    fn set_customer_id(&self, user_id: i64, customer_id: &str) -> Result<(), QuantdeskError> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE users SET stripe_customer_id = ?2 WHERE id = ?1",
            params![user_id, customer_id],
        )?;
        if updated == 0 {
            return Err(QuantdeskError::NotFound { entity: "User" });
        }
        Ok(())
    }

    fn list_strategies(&self, user_id: i64) -> Result<Vec<Strategy>, QuantdeskError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STRATEGY_COLUMNS} FROM strategies WHERE user_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id], strategy_from_row)?;

        let mut strategies = Vec::new();
        for row in rows {
            strategies.push(row?);
        }
        Ok(strategies)
    }

    fn get_strategy(&self, user_id: i64, id: i64) -> Result<Option<Strategy>, QuantdeskError> {
        let conn = self.pool.get()?;
        let strategy = conn
            .query_row(
                &format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                strategy_from_row,
            )
            .optional()?;
        Ok(strategy)
    }

    fn count_strategies(&self, user_id: i64) -> Result<usize, QuantdeskError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM strategies WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert_strategy(
        &self,
        user_id: i64,
        strategy: &NewStrategy,
        now: NaiveDateTime,
    ) -> Result<Strategy, QuantdeskError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO strategies
                (user_id, name, strategy_type, parameters, created_at, updated_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0)",
            params![
                user_id,
                strategy.name,
                strategy.kind.as_str(),
                to_json(&strategy.parameters)?,
                now
            ],
        )?;

        Ok(Strategy {
            id: conn.last_insert_rowid(),
            user_id,
            name: strategy.name.clone(),
            kind: strategy.kind,
            parameters: strategy.parameters.clone(),
            created_at: now,
            updated_at: now,
            is_active: false,
        })
    }

    fn save_strategy(&self, strategy: &Strategy) -> Result<(), QuantdeskError> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE strategies
             SET name = ?3, strategy_type = ?4, parameters = ?5, updated_at = ?6, is_active = ?7
             WHERE id = ?1 AND user_id = ?2",
            params![
                strategy.id,
                strategy.user_id,
                strategy.name,
                strategy.kind.as_str(),
                to_json(&strategy.parameters)?,
                strategy.updated_at,
                strategy.is_active
            ],
        )?;
        if updated == 0 {
            return Err(QuantdeskError::NotFound { entity: "Strategy" });
        }
        Ok(())
    }

    fn delete_strategy(&self, user_id: i64, id: i64) -> Result<bool, QuantdeskError> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM strategies WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(deleted > 0)
    }

    fn list_backtests(&self, user_id: i64) -> Result<Vec<Backtest>, QuantdeskError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BACKTEST_COLUMNS} FROM backtests
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![user_id], backtest_from_row)?;

        let mut backtests = Vec::new();
        for row in rows {
            backtests.push(row?);
        }
        Ok(backtests)
    }

    fn get_backtest(&self, user_id: i64, id: i64) -> Result<Option<Backtest>, QuantdeskError> {
        let conn = self.pool.get()?;
        let backtest = conn
            .query_row(
                &format!("SELECT {BACKTEST_COLUMNS} FROM backtests WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                backtest_from_row,
            )
            .optional()?;
        Ok(backtest)
    }

    fn count_backtests(&self, user_id: i64) -> Result<usize, QuantdeskError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM backtests WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_backtests_since(
        &self,
        user_id: i64,
        since: NaiveDateTime,
    ) -> Result<usize, QuantdeskError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM backtests WHERE user_id = ?1 AND created_at >= ?2",
            params![user_id, since],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert_backtest(
        &self,
        user_id: i64,
        backtest: &NewBacktest,
        now: NaiveDateTime,
    ) -> Result<Backtest, QuantdeskError> {
        let conn = self.pool.get()?;
        let outcome = &backtest.outcome;
        let results = match &outcome.results {
            Some(series) => Some(to_json(series)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO backtests
                (user_id, strategy_id, symbol, start_date, end_date,
                 performance, outperformance, results_data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user_id,
                backtest.strategy_id,
                backtest.symbol,
                backtest.start_date,
                backtest.end_date,
                outcome.performance,
                outcome.outperformance,
                results,
                now
            ],
        )?;

        Ok(Backtest {
            id: conn.last_insert_rowid(),
            user_id,
            strategy_id: backtest.strategy_id,
            symbol: backtest.symbol.clone(),
            start_date: backtest.start_date,
            end_date: backtest.end_date,
            performance: Some(outcome.performance),
            outperformance: Some(outcome.outperformance),
            results_data: outcome.results.clone(),
            created_at: now,
        })
    }

    fn delete_backtest(&self, user_id: i64, id: i64) -> Result<bool, QuantdeskError> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM backtests WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::BacktestOutcome;
    use crate::domain::price::parse_timestamp;
    use chrono::Duration;

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize_schema().unwrap();
        store
    }

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "$argon2id$hash".into(),
        }
    }

    fn sma_strategy(name: &str) -> NewStrategy {
        NewStrategy {
            name: name.to_string(),
            kind: StrategyKind::Sma,
            parameters: StrategyKind::Sma.default_parameters(),
        }
    }

    fn new_backtest(strategy_id: i64) -> NewBacktest {
        NewBacktest {
            strategy_id,
            symbol: "EURUSD".into(),
            start_date: ts("2024-01-01"),
            end_date: ts("2024-06-30"),
            outcome: BacktestOutcome {
                performance: 1.05,
                outperformance: 0.02,
                results: Some(ResultsSeries {
                    dates: vec!["2024-06-30 00:00:00".into()],
                    buy_and_hold: vec![1.03],
                    strategy: vec![1.05],
                }),
            },
        }
    }

    #[test]
    fn create_and_find_user() {
        let store = store();
        let user = store.create_user(&new_user("alice")).unwrap();

        assert_eq!(user.subscription.tier, Tier::Free);
        let found = store.find_user(user.id).unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert_eq!(found.email, "alice@example.com");

        let by_name = store.find_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(store.find_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_and_email_conflict() {
        let store = store();
        store.create_user(&new_user("alice")).unwrap();

        let err = store.create_user(&new_user("alice")).unwrap_err();
        assert_eq!(err.to_string(), "Username already exists");

        let mut other = new_user("alice2");
        other.email = "alice@example.com".into();
        let err = store.create_user(&other).unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[test]
    fn subscription_round_trips_through_user_row() {
        let store = store();
        let user = store.create_user(&new_user("carol")).unwrap();

        let mut state = SubscriptionState::default();
        state.activate(Tier::Professional, Some("sub_123".into()), ts("2024-03-01"));
        store.update_subscription(user.id, &state).unwrap();
        store.set_customer_id(user.id, "cus_9").unwrap();

        let found = store.find_user_by_subscription("sub_123").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.subscription, state);
        assert_eq!(found.stripe_customer_id.as_deref(), Some("cus_9"));
    }

    #[test]
    fn update_subscription_for_unknown_user_is_not_found() {
        let store = store();
        let err = store
            .update_subscription(99, &SubscriptionState::default())
            .unwrap_err();
        assert!(matches!(err, QuantdeskError::NotFound { entity: "User" }));
    }

    #[test]
    fn strategies_are_scoped_to_owner() {
        let store = store();
        let alice = store.create_user(&new_user("alice")).unwrap();
        let bob = store.create_user(&new_user("bob")).unwrap();

        let strategy = store
            .insert_strategy(alice.id, &sma_strategy("Cross"), ts("2024-01-01"))
            .unwrap();

        assert_eq!(store.count_strategies(alice.id).unwrap(), 1);
        assert_eq!(store.count_strategies(bob.id).unwrap(), 0);
        assert!(store.get_strategy(bob.id, strategy.id).unwrap().is_none());
        assert!(!store.delete_strategy(bob.id, strategy.id).unwrap());

        let fetched = store.get_strategy(alice.id, strategy.id).unwrap().unwrap();
        assert_eq!(fetched.kind, StrategyKind::Sma);
        assert_eq!(fetched.parameters, StrategyKind::Sma.default_parameters());
        assert!(!fetched.is_active);
    }

    #[test]
    fn save_strategy_persists_changes() {
        let store = store();
        let user = store.create_user(&new_user("dave")).unwrap();
        let mut strategy = store
            .insert_strategy(user.id, &sma_strategy("Cross"), ts("2024-01-01"))
            .unwrap();

        strategy.name = "Renamed".into();
        strategy.is_active = true;
        strategy.updated_at = ts("2024-01-02");
        store.save_strategy(&strategy).unwrap();

        let listed = store.list_strategies(user.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Renamed");
        assert!(listed[0].is_active);
        assert_eq!(listed[0].updated_at, ts("2024-01-02"));
    }

    #[test]
    fn deleting_strategy_cascades_to_backtests() {
        let store = store();
        let user = store.create_user(&new_user("erin")).unwrap();
        let strategy = store
            .insert_strategy(user.id, &sma_strategy("Cross"), ts("2024-01-01"))
            .unwrap();
        store
            .insert_backtest(user.id, &new_backtest(strategy.id), ts("2024-07-01"))
            .unwrap();

        assert!(store.delete_strategy(user.id, strategy.id).unwrap());
        assert!(store.list_backtests(user.id).unwrap().is_empty());
    }

    #[test]
    fn backtests_list_newest_first_with_results() {
        let store = store();
        let user = store.create_user(&new_user("frank")).unwrap();
        let strategy = store
            .insert_strategy(user.id, &sma_strategy("Cross"), ts("2024-01-01"))
            .unwrap();

        let older = store
            .insert_backtest(user.id, &new_backtest(strategy.id), ts("2024-07-01"))
            .unwrap();
        let newer = store
            .insert_backtest(user.id, &new_backtest(strategy.id), ts("2024-07-02"))
            .unwrap();

        let listed = store.list_backtests(user.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        let fetched = store.get_backtest(user.id, older.id).unwrap().unwrap();
        assert_eq!(fetched.performance, Some(1.05));
        assert_eq!(fetched.results_data, new_backtest(strategy.id).outcome.results);
    }

    #[test]
    fn count_backtests_since_uses_creation_time() {
        let store = store();
        let user = store.create_user(&new_user("gina")).unwrap();
        let strategy = store
            .insert_strategy(user.id, &sma_strategy("Cross"), ts("2024-01-01"))
            .unwrap();
        let midnight = ts("2024-07-02");

        store
            .insert_backtest(user.id, &new_backtest(strategy.id), midnight - Duration::hours(1))
            .unwrap();
        store
            .insert_backtest(user.id, &new_backtest(strategy.id), midnight + Duration::hours(1))
            .unwrap();

        assert_eq!(store.count_backtests_since(user.id, midnight).unwrap(), 1);
        assert_eq!(store.count_backtests(user.id).unwrap(), 2);
    }

    #[test]
    fn delete_backtest_reports_existence() {
        let store = store();
        let user = store.create_user(&new_user("hank")).unwrap();
        let strategy = store
            .insert_strategy(user.id, &sma_strategy("Cross"), ts("2024-01-01"))
            .unwrap();
        let backtest = store
            .insert_backtest(user.id, &new_backtest(strategy.id), ts("2024-07-01"))
            .unwrap();

        assert!(store.delete_backtest(user.id, backtest.id).unwrap());
        assert!(!store.delete_backtest(user.id, backtest.id).unwrap());
    }
}
