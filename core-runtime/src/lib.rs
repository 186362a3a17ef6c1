//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the offline download core:
//! - Logging and tracing setup
//! - Configuration (`CoreConfig`) with injected platform bridges
//! - Event bus for download, playlist, cache and device events
//!
//! ## Overview
//!
//! Every other core crate depends on this one. It fixes the logging
//! conventions, the configuration surface and the broadcast channel the UI
//! layer subscribes to.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
