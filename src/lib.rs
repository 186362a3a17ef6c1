//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map onto the individual workspace
//! crates (`core-service`, `core-offline`). Host applications can depend on
//! `offline-workspace` and enable the documented features without wiring each
//! crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service;

#[cfg(feature = "offline")]
pub use core_offline;
