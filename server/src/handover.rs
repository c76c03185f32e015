use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use log::{debug, info};

use weft_shared::{BitStream, PeerId};

use crate::error::HandoverError;

const TOKEN_LENGTH: usize = 24;
const TOKEN_ATTEMPTS: u32 = 8;

/// A pending transfer of authority, redeemable once with its token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoverSession {
    /// The authority node that asked for the transfer
    pub requested_by: PeerId,
    /// Identity the arriving peer should keep, when it has one
    pub identity: Option<PeerId>,
    /// Instance payload to report to the application on arrival
    pub instances: BitStream,
    expires_at: Instant,
}

/// Session passwords for players moving between authority nodes
pub struct HandoverSessions {
    lifetime: Duration,
    sessions: HashMap<String, HandoverSession>,
}

impl HandoverSessions {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            sessions: HashMap::new(),
        }
    }

    /// Register a session and return its token
    pub fn register(
        &mut self,
        requested_by: PeerId,
        identity: Option<PeerId>,
        instances: BitStream,
        now: Instant,
    ) -> Result<String, HandoverError> {
        for _ in 0..TOKEN_ATTEMPTS {
            let token = generate_token();
            if self.sessions.contains_key(&token) {
                continue;
            }
            debug!("registered handover session for {}", requested_by);
            self.sessions.insert(
                token.clone(),
                HandoverSession {
                    requested_by,
                    identity,
                    instances,
                    expires_at: now + self.lifetime,
                },
            );
            return Ok(token);
        }
        Err(HandoverError::TokenCollision {
            attempts: TOKEN_ATTEMPTS,
        })
    }

    /// Look a session up without spending it
    pub fn validate(&self, token: &str, now: Instant) -> Result<&HandoverSession, HandoverError> {
        let session = self.sessions.get(token).ok_or(HandoverError::UnknownToken)?;
        if now >= session.expires_at {
            return Err(HandoverError::Expired {
                expired_ms: now.duration_since(session.expires_at).as_millis() as u64,
            });
        }
        Ok(session)
    }

    /// Consume a session
    pub fn redeem(&mut self, token: &str, now: Instant) -> Result<HandoverSession, HandoverError> {
        let session = self
            .sessions
            .remove(token)
            .ok_or(HandoverError::UnknownToken)?;
        if now >= session.expires_at {
            return Err(HandoverError::Expired {
                expired_ms: now.duration_since(session.expires_at).as_millis() as u64,
            });
        }
        Ok(session)
    }

    /// Drop expired sessions. Called once per tick.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| now < session.expires_at);
        let expired = before - self.sessions.len();
        if expired > 0 {
            info!("{} handover sessions expired", expired);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn generate_token() -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(TOKEN_LENGTH)
        .collect()
}
