//! Cyclic File Watcher - bounded version history for slowly changing files.

pub mod config;
pub mod watcher;
