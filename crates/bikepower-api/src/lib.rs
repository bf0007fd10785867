//! Shared data types for bikepower
//!
//! These types are the vocabulary shared by the store, the core engine and
//! whatever collaborator drives them (the `bikepowerd` CLI today):
//! - Power state and access records
//! - Status views returned to callers
//! - Deactivation triggers

mod types;

pub use types::*;
