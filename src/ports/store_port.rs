//! Account persistence port trait: users, strategies and backtest runs.
//!
//! Every strategy and backtest lookup is scoped by the owning user id, so a
//! record belonging to someone else reads as absent.

use chrono::NaiveDateTime;

use crate::domain::backtest::{Backtest, NewBacktest};
use crate::domain::error::QuantdeskError;
use crate::domain::strategy::{NewStrategy, Strategy};
use crate::domain::subscription::SubscriptionState;
use crate::domain::user::{NewUser, User};

pub trait AccountStore {
    /// Fails with `Conflict` when the username or email is taken.
    fn create_user(&self, user: &NewUser) -> Result<User, QuantdeskError>;
    fn find_user(&self, id: i64) -> Result<Option<User>, QuantdeskError>;
    fn find_user_by_username(&self, username: &str) -> Result<Option<User>, QuantdeskError>;
    fn find_user_by_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<User>, QuantdeskError>;
    fn update_subscription(
        &self,
        user_id: i64,
        subscription: &SubscriptionState,
    ) -> Result<(), QuantdeskError>;
    fn set_customer_id(&self, user_id: i64, customer_id: &str) -> Result<(), QuantdeskError>;

    fn list_strategies(&self, user_id: i64) -> Result<Vec<Strategy>, QuantdeskError>;
    fn get_strategy(&self, user_id: i64, id: i64) -> Result<Option<Strategy>, QuantdeskError>;
    fn count_strategies(&self, user_id: i64) -> Result<usize, QuantdeskError>;
    fn insert_strategy(
        &self,
        user_id: i64,
        strategy: &NewStrategy,
        now: NaiveDateTime,
    ) -> Result<Strategy, QuantdeskError>;
    fn save_strategy(&self, strategy: &Strategy) -> Result<(), QuantdeskError>;
    /// Deletes the strategy and its backtests. Returns whether it existed.
    fn delete_strategy(&self, user_id: i64, id: i64) -> Result<bool, QuantdeskError>;

    /// Newest first.
    fn list_backtests(&self, user_id: i64) -> Result<Vec<Backtest>, QuantdeskError>;
    fn get_backtest(&self, user_id: i64, id: i64) -> Result<Option<Backtest>, QuantdeskError>;
    fn count_backtests(&self, user_id: i64) -> Result<usize, QuantdeskError>;
    fn count_backtests_since(
        &self,
        user_id: i64,
        since: NaiveDateTime,
    ) -> Result<usize, QuantdeskError>;
    fn insert_backtest(
        &self,
        user_id: i64,
        backtest: &NewBacktest,
        now: NaiveDateTime,
    ) -> Result<Backtest, QuantdeskError>;
    fn delete_backtest(&self, user_id: i64, id: i64) -> Result<bool, QuantdeskError>;
}
