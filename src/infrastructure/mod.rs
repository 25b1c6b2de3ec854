pub mod auth_provider;
pub mod calendar_transport;
pub mod config;
pub mod error;
pub mod event_mapper;
pub mod insight_client;
pub mod key_value_store;
pub mod logging;
pub mod oauth_client;
pub mod session;
pub mod storage;
pub mod subscription_repository;
