//! Preprint repository archiver library.
//!
//! Crawls a preprint collection, finds the code repositories its articles
//! link to, and makes sure each one is preserved in Software Heritage.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod archiver;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod db;
pub mod harvest;
pub mod links;
pub mod pdf;
pub mod pool;
pub mod swh;
