pub mod config;
pub mod duration;
pub mod error;
pub mod ledger;
pub mod market_data;
pub mod models;
pub mod sync;
pub mod valuation;
