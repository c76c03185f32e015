use weft_shared::{Security, SecurityFactory, SecurityStatus};

const ACCEPTED: &[u8] = b"ok";

/// A toy cipher for exercising the secure frame path. Both ends must share
/// the key; the handshake just compares it.
pub struct XorSecurity {
    key: u8,
    status: SecurityStatus,
}

impl XorSecurity {
    pub fn new(key: u8) -> Self {
        Self {
            key,
            status: SecurityStatus::Disabled,
        }
    }

    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().map(|byte| byte ^ self.key).collect()
    }
}

impl Security for XorSecurity {
    fn status(&self) -> SecurityStatus {
        self.status
    }

    fn initiate(&mut self) -> Vec<u8> {
        self.status = SecurityStatus::Requested;
        vec![self.key]
    }

    fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if request != [self.key] {
            return None;
        }
        self.status = SecurityStatus::Enabled;
        Some(ACCEPTED.to_vec())
    }

    fn complete(&mut self, response: &[u8]) -> bool {
        if self.status != SecurityStatus::Requested || response != ACCEPTED {
            return false;
        }
        self.status = SecurityStatus::Enabled;
        true
    }

    fn encrypt(&mut self, plain: &[u8]) -> Option<Vec<u8>> {
        Some(self.apply(plain))
    }

    fn decrypt(&mut self, cipher: &[u8]) -> Option<Vec<u8>> {
        Some(self.apply(cipher))
    }

    fn disable(&mut self) {
        self.status = SecurityStatus::Disabled;
    }
}

/// Hands out [`XorSecurity`] sessions sharing one key
pub struct XorSecurityFactory {
    pub key: u8,
}

impl SecurityFactory for XorSecurityFactory {
    fn create(&self) -> Box<dyn Security> {
        Box::new(XorSecurity::new(self.key))
    }
}
