pub mod cache;
pub mod config;
pub mod directory;
pub mod logging;
pub mod repositories;
