pub mod connection_config;
pub mod connection_state;
pub mod error;
pub mod identity_pool;
pub mod link;
pub mod security;
pub mod tick_pool;
pub mod transport;
