//! HTTP benchmarking and load generating tool.
//!
//! A benchmark run dispatches waves of concurrent requests against a set
//! of endpoints and aggregates per-request outcomes into a single result:
//! latency extrema and averages, payload sizes, status code histograms
//! and per-endpoint concurrency batches.

pub mod bench;
pub mod cli;
pub mod config;
pub mod error;
pub mod render;
pub mod report;

pub use bench::Bench;
pub use config::{Endpoint, Method, RunConfig};
pub use error::BenchError;
pub use report::{BenchResult, Recorder};
