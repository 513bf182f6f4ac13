//! Opaque authenticated-encryption seam
//!
//! The key ring core never performs encryption itself. Each key carries an
//! [`EncryptorFactory`] and treats the produced [`Encryptor`] as opaque;
//! the concrete construction (AES-GCM, AES-CBC+HMAC, hardware-backed) is a
//! repository concern.

use std::sync::Arc;

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::EncryptionError;

/// Authenticated encryption over a single key's material.
pub trait Encryptor: Send + Sync {
    /// Encrypts `plaintext`, binding `aad` into the authentication tag.
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// Reverses [`Encryptor::encrypt`]; fails if the payload or `aad` was
    /// tampered with.
    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

impl std::fmt::Debug for dyn Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn Encryptor>")
    }
}

/// Deferred construction of a key's encryptor.
///
/// Construction may fail (missing hardware, unwrappable material); the
/// owning key captures that failure and reports the key as unusable.
pub trait EncryptorFactory: Send + Sync {
    fn create_encryptor(&self) -> anyhow::Result<Arc<dyn Encryptor>>;
}

/// Software AES-256-GCM factory.
///
/// Holds the raw key material; the bytes are wiped when the factory drops.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AesGcmEncryptorFactory {
    key_material: Vec<u8>,
}

impl AesGcmEncryptorFactory {
    pub const KEY_LEN: usize = 32;

    pub fn new(key_material: Vec<u8>) -> anyhow::Result<Self> {
        if key_material.len() != Self::KEY_LEN {
            anyhow::bail!(
                "AES-256-GCM key material must be {} bytes, got {}",
                Self::KEY_LEN,
                key_material.len()
            );
        }
        Ok(Self { key_material })
    }

    /// Factory over freshly generated random material.
    pub fn generate() -> anyhow::Result<Self> {
        let mut key_material = vec![0u8; Self::KEY_LEN];
        SystemRandom::new()
            .fill(&mut key_material)
            .map_err(|_| anyhow::anyhow!("system RNG failure while generating key material"))?;
        Ok(Self { key_material })
    }
}

impl EncryptorFactory for AesGcmEncryptorFactory {
    fn create_encryptor(&self) -> anyhow::Result<Arc<dyn Encryptor>> {
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.key_material)
            .map_err(|_| anyhow::anyhow!("invalid AES-256-GCM key material"))?;
        Ok(Arc::new(AesGcmEncryptor { key: LessSafeKey::new(unbound), rng: SystemRandom::new() }))
    }
}

/// AES-256-GCM with a random 96-bit nonce prefixed to the ciphertext.
struct AesGcmEncryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::Crypto("nonce generation failed".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| EncryptionError::Crypto("seal failed".to_string()))?;

        let mut output = Vec::with_capacity(NONCE_LEN + in_out.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&in_out);
        Ok(output)
    }

    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if ciphertext.len() < NONCE_LEN + self.key.algorithm().tag_len() {
            return Err(EncryptionError::Malformed);
        }
        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| EncryptionError::Malformed)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| EncryptionError::Unauthentic)?;
        Ok(plaintext.to_vec())
    }
}
