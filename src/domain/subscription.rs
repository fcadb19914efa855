//! Subscription tiers, their limits, and the per-user subscription state.

use chrono::{Duration, NaiveDateTime};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::QuantdeskError;

/// Length of one paid billing period.
pub const BILLING_PERIOD_DAYS: i64 = 30;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Professional,
    Enterprise,
}

impl Tier {
    /// Display order, cheapest first.
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Basic, Tier::Professional, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
        }
    }

    pub fn config(&self) -> TierConfig {
        match self {
            Tier::Free => TierConfig {
                name: "Free".to_string(),
                price: 0.0,
                max_strategies: Limit::Max(1),
                max_backtests_per_day: Limit::Max(5),
                live_trading: false,
            },
            Tier::Basic => TierConfig {
                name: "Basic".to_string(),
                price: 29.99,
                max_strategies: Limit::Max(5),
                max_backtests_per_day: Limit::Max(50),
                live_trading: true,
            },
            Tier::Professional => TierConfig {
                name: "Professional".to_string(),
                price: 99.99,
                max_strategies: Limit::Max(20),
                max_backtests_per_day: Limit::Max(200),
                live_trading: true,
            },
            Tier::Enterprise => TierConfig {
                name: "Enterprise".to_string(),
                price: 299.99,
                max_strategies: Limit::Unlimited,
                max_backtests_per_day: Limit::Unlimited,
                live_trading: true,
            },
        }
    }

    pub fn is_paid(&self) -> bool {
        *self != Tier::Free
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = QuantdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| QuantdeskError::validation("Invalid subscription tier"))
    }
}

/// A feature quota. Serialised as the count, or `-1` when unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    Max(u32),
}

impl Limit {
    /// Whether one more item fits when `current` are already in use.
    pub fn allows(&self, current: usize) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Max(max) => current < *max as usize,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Unlimited => serializer.serialize_i64(-1),
            Limit::Max(n) => serializer.serialize_i64(i64::from(*n)),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            -1 => Ok(Limit::Unlimited),
            n if n >= 0 => u32::try_from(n)
                .map(Limit::Max)
                .map_err(serde::de::Error::custom),
            n => Err(serde::de::Error::custom(format!("invalid limit {n}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub price: f64,
    pub max_strategies: Limit,
    pub max_backtests_per_day: Limit,
    pub live_trading: bool,
}

impl TierConfig {
    /// Price in the processor's minor unit (cents).
    pub fn unit_amount(&self) -> i64 {
        (self.price * 100.0).round() as i64
    }

    pub fn strategies_label(&self) -> String {
        match self.max_strategies {
            Limit::Unlimited => "Unlimited strategies".to_string(),
            Limit::Max(1) => "1 strategy".to_string(),
            Limit::Max(n) => format!("{n} strategies"),
        }
    }

    pub fn backtests_label(&self) -> String {
        match self.max_backtests_per_day {
            Limit::Unlimited => "Unlimited backtests".to_string(),
            Limit::Max(n) => format!("{n} backtests/day"),
        }
    }

    pub fn live_trading_label(&self) -> &'static str {
        if self.live_trading {
            "Live trading"
        } else {
            "No live trading"
        }
    }
}

/// The full tier catalogue, serialised as an object keyed by tier in display order.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierCatalog;

impl Serialize for TierCatalog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Tier::ALL.len()))?;
        for tier in Tier::ALL {
            map.serialize_entry(tier.as_str(), &tier.config())?;
        }
        map.end()
    }
}

/// Subscription fields carried on a user.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscriptionState {
    pub tier: Tier,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub stripe_subscription_id: Option<String>,
}

impl SubscriptionState {
    /// Starts a paid billing period at `now`.
    pub fn activate(&mut self, tier: Tier, subscription_id: Option<String>, now: NaiveDateTime) {
        self.tier = tier;
        self.start_date = Some(now);
        self.end_date = Some(now + Duration::days(BILLING_PERIOD_DAYS));
        self.stripe_subscription_id = subscription_id;
    }

    /// Falls back to the free tier, ending the current period at `now`.
    pub fn downgrade(&mut self, now: NaiveDateTime) {
        self.tier = Tier::Free;
        self.end_date = Some(now);
        self.stripe_subscription_id = None;
    }

    /// Processor subscription id, if one is on file.
    pub fn processor_subscription_id(&self) -> Option<&str> {
        self.stripe_subscription_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }
}

/// Response body for the current-subscription endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSubscription {
    pub tier: Tier,
    pub tier_config: TierConfig,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub stripe_subscription_id: Option<String>,
}

impl From<&SubscriptionState> for CurrentSubscription {
    fn from(state: &SubscriptionState) -> Self {
        Self {
            tier: state.tier,
            tier_config: state.tier.config(),
            start_date: state.start_date,
            end_date: state.end_date,
            stripe_subscription_id: state.stripe_subscription_id.clone(),
        }
    }
}
