pub mod blob_store;
pub mod storage_index;
pub mod storage_service;
