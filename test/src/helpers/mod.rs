pub mod harness;
pub mod recording_host;
pub mod xor_security;

pub use harness::{
    connect_client, pump, replication_step, second_server_address, server_address, ClientLog,
    ServerLog, TestClient, TestServer, PUMP_ROUNDS,
};
pub use recording_host::{AppliedState, RecordingHost};
pub use xor_security::{XorSecurity, XorSecurityFactory};
