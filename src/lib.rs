pub mod aggregate;
pub mod app;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod offset;
pub mod payload;
pub mod pipeline;
pub mod scanner;
pub mod sidecar;
pub mod totals;
pub mod util;
