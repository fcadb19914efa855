//! Concrete adapter implementations for ports.

pub mod api_client;
pub mod csv_adapter;
pub mod file_config_adapter;
pub mod sqlite_adapter;
pub mod sqlite_store;
pub mod stripe_adapter;
pub mod web;
