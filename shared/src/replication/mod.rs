pub mod delta;
pub mod entity_host;
pub mod error;
pub mod handover;
pub mod receiver;
pub mod replication_config;
pub mod scheduler;
pub mod snapshot;
pub mod state_sync;
