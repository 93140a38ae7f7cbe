//! Channel monitoring engine.
//!
//! Brings up worker sessions, splits active channels across them, pulls new
//! messages past each channel's watermark, keeps the ones matching the live
//! keyword rules, and fans every match out to the reviewers as work items
//! with single-winner resolution.

pub mod alerting;
pub mod config;
pub mod distributor;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod keywords;
pub mod monitor;
pub mod notifier;
pub mod pool;
pub mod processing;
pub mod session;

pub use config::MonitorConfig;
pub use error::{FetchError, SessionError};
pub use monitor::Monitor;
