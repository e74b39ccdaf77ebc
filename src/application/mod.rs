pub mod bootstrap;
pub mod commands;
pub mod error;
pub mod invalidation;
pub mod operations;
pub mod realtime_bridge;
pub mod request_executor;
pub mod token_store;
