//! Action-scoped nonces for the legacy pipeline.
//!
//! A nonce is `salt:mac`, where `mac` is HMAC-SHA256 over the salt, the
//! action name and the acting user. The context consumes a nonce when it is
//! verified, so each one authorizes a single handler check.

use anyhow::{Result, anyhow};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes mixed into each nonce.
const SALT_LEN: usize = 16;

/// Issues and verifies nonces bound to an action and a user.
#[derive(Clone)]
pub struct NonceIssuer {
    mac: HmacSha256,
}

impl NonceIssuer {
    pub fn new(secret: &[u8]) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow!("invalid nonce secret: {e}"))?;
        Ok(Self { mac })
    }

    /// Issuer keyed with a fresh random secret.
    pub fn random() -> Result<Self> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(&secret)
    }

    /// Issue a nonce for `action` on behalf of `user_id`.
    pub fn issue(&self, action: &str, user_id: u64) -> String {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let mac = self.sign(&salt, action, user_id);
        format!("{salt}:{mac}")
    }

    /// Check that `token` was issued for `action` and `user_id`.
    pub fn verify(&self, token: &str, action: &str, user_id: u64) -> bool {
        let Some((salt, mac)) = token.split_once(':') else {
            return false;
        };
        if salt.len() != SALT_LEN * 2 {
            return false;
        }

        let expected = self.sign(salt, action, user_id);
        expected.as_bytes().ct_eq(mac.as_bytes()).into()
    }

    fn sign(&self, salt: &str, action: &str, user_id: u64) -> String {
        let mut mac = self.mac.clone();
        mac.update(salt.as_bytes());
        mac.update(b"|");
        mac.update(action.as_bytes());
        mac.update(b"|");
        mac.update(&user_id.to_le_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for NonceIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceIssuer").finish_non_exhaustive()
    }
}
