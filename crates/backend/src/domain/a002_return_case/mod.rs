pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod repository;
pub mod service;
pub mod snapshot;
