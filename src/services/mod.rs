//! Service layer: storage and index adapters, session bookkeeping and the
//! two upload paths built on them.

pub mod disk_store;
pub mod file_service;
pub mod metadata_index;
pub mod object_keys;
pub mod object_store;
pub mod part_list;
pub mod session_registry;
pub mod upload_coordinator;
