//! Business logic services.

pub mod database_service;
pub mod index_diff;
pub mod index_inspector;
pub mod index_service;
pub mod index_signature;
pub mod index_sync_service;
pub mod mongo_catalog;
pub mod sync_record_service;
pub mod task_queue;
