pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod gzip;
pub mod model;
pub mod output;
pub mod progress;
pub mod soft;
pub mod transport;
