//! Data models for the transfer reaper.
//!
//! `Transfer` and `TransferFile` map to the `transfers` and `files` tables via
//! `sqlx::FromRow`. The `summary` types describe what one reaper pass did.

pub mod file;
pub mod summary;
pub mod transfer;
