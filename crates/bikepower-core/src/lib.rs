//! Access state engine and expiry sweep for bikepower
//!
//! This crate holds every rule that decides whether a vehicle is powered:
//! - Effective state evaluation (lazy expiry on read)
//! - Payment handling (open a fresh access window)
//! - Periodic sweep of lapsed records, driven by an injectable clock

mod access;
mod engine;
mod error;
mod sweep;

pub use access::*;
pub use engine::*;
pub use error::*;
pub use sweep::*;
