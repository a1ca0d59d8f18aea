pub mod config;
pub mod error;
pub mod geo;
pub mod identity;
pub mod migrate;
pub mod models;
pub mod recorder;
pub mod retry;
pub mod stats;
pub mod store;
pub mod validate;
