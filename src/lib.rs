#![forbid(unsafe_code)]

pub mod audit;
pub mod build;
pub mod comms;
pub mod config;
pub mod errors;
pub mod extract;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod sandbox;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
