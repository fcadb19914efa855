//! Core domain types and logic.

pub mod price;
pub mod indicator;
pub mod strategy;
pub mod backtest;
pub mod subscription;
pub mod user;
pub mod error;
