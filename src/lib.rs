//! Upload files to an object store, index their names in SQLite, and serve
//! them back over HTTP.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
