pub mod error;
pub mod filters;
pub mod response;
pub mod routes;
