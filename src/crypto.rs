/// PII encryption collaborator boundary.
///
/// SSN and DOB are persisted only through this interface; plaintext never
/// reaches the stores or the logs. Deployments swap in their KMS-backed
/// cipher through the trait. `KeystreamCipher` is the bundled
/// implementation used by the binary and the tests.
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::AppError;

#[async_trait]
pub trait PiiCipher: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, AppError>;
    async fn decrypt(&self, ciphertext: &str) -> Result<String, AppError>;
}

/// Last four digits of an SSN for display; `None` when the input does not
/// carry at least four digits.
pub fn ssn_last_four(ssn: &str) -> Option<String> {
    let digits: Vec<char> = ssn.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

/// SHA-256 counter-mode keystream cipher with a random per-message nonce,
/// hex-encoded output. Unauthenticated; integrity is the database's problem,
/// confidentiality at rest is this cipher's.
pub struct KeystreamCipher {
    key: [u8; 32],
}

const NONCE_LEN: usize = 16;

impl KeystreamCipher {
    pub fn from_hex_key(hex_key: &str) -> Result<Self, AppError> {
        let decoded = hex::decode(hex_key.trim())
            .map_err(|_| AppError::CryptoError("PII key is not valid hex".to_string()))?;
        let key: [u8; 32] = decoded
            .try_into()
            .map_err(|_| AppError::CryptoError("PII key must be 32 bytes".to_string()))?;
        Ok(Self { key })
    }

    fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) {
        for (block_idx, chunk) in data.chunks_mut(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(nonce);
            hasher.update((block_idx as u64).to_le_bytes());
            let block = hasher.finalize();
            for (byte, ks) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= ks;
            }
        }
    }
}

#[async_trait]
impl PiiCipher for KeystreamCipher {
    async fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce = Uuid::new_v4().into_bytes();
        let mut data = plaintext.as_bytes().to_vec();
        self.apply_keystream(&nonce, &mut data);

        let mut out = Vec::with_capacity(NONCE_LEN + data.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&data);
        Ok(hex::encode(out))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String, AppError> {
        let raw = hex::decode(ciphertext)
            .map_err(|_| AppError::CryptoError("Ciphertext is not valid hex".to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(AppError::CryptoError("Ciphertext too short".to_string()));
        }
        let (nonce, body) = raw.split_at(NONCE_LEN);
        let mut data = body.to_vec();
        self.apply_keystream(nonce, &mut data);

        String::from_utf8(data)
            .map_err(|_| AppError::CryptoError("Decrypted PII is not valid UTF-8".to_string()))
    }
}
