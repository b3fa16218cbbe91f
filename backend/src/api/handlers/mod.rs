//! HTTP request handlers.

pub mod databases;
pub mod health;
pub mod indexes;
pub mod syncs;
