//! Sandboxed placement of untrusted artifacts.
//!
//! [`PathGuard`] decides whether a requested path may be written and
//! [`FileWriter`] performs the write, always consulting the guard first.

pub mod path_guard;
pub mod writer;

pub use path_guard::PathGuard;
pub use writer::{FileWriter, WriteSummary};
