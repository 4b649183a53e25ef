pub mod eventsource;
pub mod https;
