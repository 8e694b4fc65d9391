//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! Every other `core-*` crate depends on this one for the conventions it
//! establishes: one `CoreConfig` per sync root, `tracing` for diagnostics and
//! broadcast events for anything a host may want to display.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
