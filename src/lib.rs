//! rpi-tracker library
//!
//! Task graph store, evidence extraction, completion scoring, status
//! updates and progress reporting for Research → Plan → Implement projects.

pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod evidence;
pub mod export;
pub mod format;
pub mod graph;
pub mod logging;
pub mod plan;
pub mod report;
pub mod scoring;
pub mod source;
pub mod tracker;
pub mod types;
pub mod updater;
