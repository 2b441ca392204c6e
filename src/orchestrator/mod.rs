//! Scheduling of delivery cycles.

pub mod poll_loop;

pub use poll_loop::{CycleSummary, PollLoop};
