//! Scout core: typed conversation model, configuration, and utilities.

pub mod config;
pub mod types;
pub mod utils;
