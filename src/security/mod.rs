pub mod audit;
pub mod auth;
pub mod directory;
pub mod permission;
pub mod token;
