//! `foresight-core` -- pure domain logic for analysis progress tracking.
//!
//! Holds the progress state model, the typed push-event vocabulary, and
//! the event interpreter. Nothing in this crate performs I/O or owns a
//! timer; the `foresight-tracker` crate drives it.

pub mod error;
pub mod interpreter;
pub mod progress;
pub mod progress_events;
pub mod types;
