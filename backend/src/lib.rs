//! Index Keeper - Backend Library
//!
//! Declares MongoDB indexes per collection, diffs them against the live
//! databases and applies the difference through a background task queue.

#[macro_use]
mod macros;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
