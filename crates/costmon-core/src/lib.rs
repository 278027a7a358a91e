//! # costmon-core
//!
//! Shared plumbing for the costmon crates.
//!
//! This crate provides:
//! - [`MonitorError`] - configuration, filesystem and environment errors
//! - [`logging`] - tracing setup with JSON file logs and console output
//! - [`paths`] - the `~/.llm-cost-monitor` state directory layout
//!
//! ## Example
//!
//! ```no_run
//! use costmon_core::{MonitorError, logging, paths};
//!
//! fn main() -> costmon_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!
//!     let config_path = paths::default_config_file()?;
//!     if !config_path.exists() {
//!         tracing::info!(path = %config_path.display(), "no config file, using defaults");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{MonitorError, Result};
pub use logging::{LogGuard, init_logging};
