//! Shared utilities for bikepower
//!
//! This crate provides:
//! - ID types (Plate, PaymentId)
//! - Time utilities (injectable clocks, mock time, duration formatting)
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
