//! # Offline Metadata Store
//!
//! Owns the SQLite database behind the offline download core and exposes
//! repositories for every persisted relation.
//!
//! ## Overview
//!
//! This crate manages:
//! - The schema and its migrations
//! - Download jobs, cached assets, playlist aggregates, song links and
//!   download preferences
//! - Status enums with their transition and rollup rules
//!
//! It holds no orchestration logic; `core-offline` reads and writes through
//! the repository traits defined here.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
