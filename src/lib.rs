pub mod api;
pub mod cache;
pub mod config;
pub mod security;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
