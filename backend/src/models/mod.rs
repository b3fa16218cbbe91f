//! Domain models.

pub mod database;
pub mod index_spec;
pub mod sync_record;
pub mod task;
