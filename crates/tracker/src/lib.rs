//! `foresight-tracker` -- live progress tracking for analysis jobs.
//!
//! Binds an SSE progress stream ([`connection`]), a stall watchdog that
//! falls back to polling the status endpoint ([`watchdog`]), and the
//! orchestrating [`tracker::ProgressTracker`] that owns the published
//! progress state. HTTP collaborators live in [`api`] and [`transport`].
//! The `foresight-track` binary entrypoint lives in `main.rs`.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod reconnect;
pub mod tracker;
pub mod transport;
pub mod watchdog;

#[cfg(test)]
mod testing;
