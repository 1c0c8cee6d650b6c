pub mod blob_store;
pub mod reaper;
pub mod s3_blob_store;
pub mod transfer_store;
