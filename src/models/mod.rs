//! Domain model module declarations.

pub mod artifact;
pub mod message;
pub mod outcome;
