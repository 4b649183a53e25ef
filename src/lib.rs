pub mod auth;
pub mod device;
pub mod error;
pub mod protocols;
pub mod settings;
pub mod store;
pub mod telemetry;
