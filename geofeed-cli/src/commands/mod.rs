//! CLI command implementations.

pub mod cache;
pub mod config;
pub mod demo;
pub mod fetch;
pub mod geohash;
pub mod init;
