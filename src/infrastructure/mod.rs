pub mod api_transport;
pub mod auth_client;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod jwt;
pub mod query_cache;
pub mod realtime_channel;
pub mod session_repository;
