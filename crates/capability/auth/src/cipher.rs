//! 敏感数据加解密（AES-256-GCM）。
//!
//! 输出为 base64(nonce || ciphertext)，nonce 为 96 位随机数。

use crate::AuthError;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::Engine;
use sha2::Sha256;

const NONCE_LEN: usize = 12;
const KEY_DERIVATION_SALT: &[u8] = b"scada-gateway-data-cipher";
const KEY_DERIVATION_ITERATIONS: u32 = 100_000;

#[derive(Clone)]
pub(crate) struct DataCipher {
    cipher: Aes256Gcm,
}

impl DataCipher {
    /// 不少于 32 字节的密钥材料直接截取使用，较短的经 PBKDF2 派生。
    pub(crate) fn new(master_key: &[u8]) -> Self {
        let key = derive_key(master_key);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub(crate) fn generate_random() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub(crate) fn encrypt(&self, plaintext: &str) -> Result<String, AuthError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AuthError::Crypto("encryption failed".to_string()))?;
        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    pub(crate) fn decrypt(&self, encoded: &str) -> Result<String, AuthError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::Crypto("invalid base64".to_string()))?;
        if combined.len() < NONCE_LEN {
            return Err(AuthError::Crypto("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AuthError::Crypto("decryption failed".to_string()))?;
        String::from_utf8(plaintext).map_err(|_| AuthError::Crypto("plaintext is not utf-8".to_string()))
    }
}

fn derive_key(input: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    if input.len() >= 32 {
        key.copy_from_slice(&input[..32]);
        return key;
    }
    pbkdf2::pbkdf2_hmac::<Sha256>(input, KEY_DERIVATION_SALT, KEY_DERIVATION_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_fresh_per_message() {
        let cipher = DataCipher::new(b"this_is_a_32_byte_master_key_for_testing");
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "same");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn short_keys_are_derived() {
        assert_eq!(derive_key(b"short"), derive_key(b"short"));
        assert_ne!(derive_key(b"short"), derive_key(b"shorter"));
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let sealed = DataCipher::new(b"key-one").encrypt("secret").unwrap();
        assert!(DataCipher::new(b"key-two").decrypt(&sealed).is_err());
        assert!(DataCipher::generate_random().decrypt("AAAA").is_err());
    }
}
