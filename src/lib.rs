//! quantdesk: algorithmic trading platform backend.
//!
//! Users keep strategies, backtest them against stored prices under tiered
//! subscription quotas, and pay for upgrades through Stripe checkout.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
pub mod logging;
