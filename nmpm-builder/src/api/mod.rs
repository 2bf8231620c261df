//! HTTP API handlers for nmpm-builder

pub mod builds;
pub mod credentials;
pub mod health;

pub use builds::build_routes;
pub use credentials::credential_routes;
pub use health::health_routes;
