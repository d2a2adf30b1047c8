pub mod b2_store;
pub mod file_service;
pub mod local_store;
pub mod object_store;
