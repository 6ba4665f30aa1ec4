//! Pre-shared secret authentication.
//!
//! The credential proves possession of the secret without revealing it, and
//! the challenge binds that proof to a fresh server nonce:
//!
//! ```text
//! server -> client   nonce (16 random bytes)
//! client -> server   SHA-256(secret || nonce)
//! ```

use super::{Channel, SecurityModule};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::framer::ConnectRequest;
use crate::protocol::header::{recv_exact, send_all};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const NONCE_LEN: usize = 16;
const DIGEST_LEN: usize = 32;
const CREDENTIAL_DOMAIN: &[u8] = b"launchwire-credential";

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKeySecurity {
    secret: Vec<u8>,
}

impl SharedKeySecurity {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    fn digest(&self, parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    fn credential(&self) -> [u8; DIGEST_LEN] {
        self.digest(&[CREDENTIAL_DOMAIN, &self.secret[..]])
    }
}

impl fmt::Debug for SharedKeySecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeySecurity").finish_non_exhaustive()
    }
}

/// Generate a cryptographically secure random nonce
fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::fill(&mut nonce)
        .map_err(|e| ProtocolError::HandshakeError(format!("nonce generation failed: {e}")))?;
    Ok(nonce)
}

/// Constant-time digest comparison
fn digests_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.ct_eq(expected).into()
}

impl SecurityModule for SharedKeySecurity {
    fn name(&self) -> &str {
        "shared-key"
    }

    fn create_credential(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.credential().to_vec()))
    }

    fn validate_credential(&self, peer: &ConnectRequest, credential: Option<&[u8]>) -> Result<()> {
        match credential {
            Some(presented) if digests_match(presented, &self.credential()) => Ok(()),
            _ => {
                warn!(flag = %peer.flag, "Shared-key credential rejected");
                Err(ProtocolError::InvalidCredential)
            }
        }
    }

    fn requires_challenge(&self) -> bool {
        true
    }

    fn client_challenge(&self, channel: &mut dyn Channel) -> Result<()> {
        let nonce = recv_exact(&mut *channel, NONCE_LEN)?;
        let response = self.digest(&[&self.secret[..], &nonce[..]]);
        send_all(&mut *channel, &response)?;
        debug!("Answered shared-key challenge");
        Ok(())
    }

    fn server_challenge(&self, channel: &mut dyn Channel) -> Result<()> {
        let nonce = generate_nonce()?;
        send_all(&mut *channel, &nonce)?;
        let response = recv_exact(&mut *channel, DIGEST_LEN)?;
        if digests_match(&response, &self.digest(&[&self.secret[..], &nonce[..]])) {
            Ok(())
        } else {
            warn!("{}", constants::ERR_CHALLENGE_FAILED);
            Err(ProtocolError::InvalidCredential)
        }
    }
}
