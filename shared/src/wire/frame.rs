use crate::connection::security::Security;

use super::error::WireError;

/// First byte of a datagram carrying a plain envelope
pub const PLAIN_FRAME: u8 = 0;
/// First byte of a datagram carrying an encrypted envelope
pub const SECURE_FRAME: u8 = 1;

/// An envelope recovered from a datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenedFrame {
    pub secure: bool,
    pub envelope: Vec<u8>,
}

/// Prefix `envelope` with a frame marker, encrypting it when `security` is
/// enabled
pub fn seal(
    envelope: &[u8],
    security: Option<&mut (dyn Security + '_)>,
) -> Result<Vec<u8>, WireError> {
    match security {
        Some(security) if security.is_enabled() => {
            let cipher = security
                .encrypt(envelope)
                .ok_or(WireError::SecurityFailed {
                    operation: "encrypt",
                    size: envelope.len(),
                })?;
            let mut output = Vec::with_capacity(cipher.len() + 1);
            output.push(SECURE_FRAME);
            output.extend_from_slice(&cipher);
            Ok(output)
        }
        _ => {
            let mut output = Vec::with_capacity(envelope.len() + 1);
            output.push(PLAIN_FRAME);
            output.extend_from_slice(envelope);
            Ok(output)
        }
    }
}

/// Strip the frame marker, decrypting secure frames
pub fn open(
    datagram: &[u8],
    security: Option<&mut (dyn Security + '_)>,
) -> Result<OpenedFrame, WireError> {
    let (marker, body) = datagram.split_first().ok_or(WireError::EmptyFrame)?;
    match *marker {
        PLAIN_FRAME => Ok(OpenedFrame {
            secure: false,
            envelope: body.to_vec(),
        }),
        SECURE_FRAME => {
            let security = security
                .filter(|security| security.is_enabled())
                .ok_or(WireError::SecurityUnavailable)?;
            let envelope = security.decrypt(body).ok_or(WireError::SecurityFailed {
                operation: "decrypt",
                size: body.len(),
            })?;
            Ok(OpenedFrame {
                secure: true,
                envelope,
            })
        }
        marker => Err(WireError::InvalidFrameMarker { marker }),
    }
}
