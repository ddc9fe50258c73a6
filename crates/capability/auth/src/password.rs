use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

pub(crate) const SALT_LEN: usize = 16;
pub(crate) const HASH_LEN: usize = 32;

/// 口令派生结果（只保存盐与派生值，不保存明文）。
#[derive(Clone)]
pub(crate) struct PasswordHash {
    salt: [u8; SALT_LEN],
    hash: [u8; HASH_LEN],
}

impl PasswordHash {
    /// 使用新的随机盐派生口令。
    pub(crate) fn generate(password: &str, iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let hash = derive(password, &salt, iterations);
        Self { salt, hash }
    }

    /// 用保存的盐重新派生并做常量时间比较。
    pub(crate) fn verify(&self, password: &str, iterations: u32) -> bool {
        let candidate = derive(password, &self.salt, iterations);
        candidate.ct_eq(&self.hash).into()
    }
}

/// PBKDF2-HMAC-SHA256。
fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_and_rejects() {
        let hash = PasswordHash::generate("admin123", 1000);
        assert!(hash.verify("admin123", 1000));
        assert!(!hash.verify("admin124", 1000));
        assert!(!hash.verify("admin123", 999));
    }

    #[test]
    fn salts_differ_per_hash() {
        let a = PasswordHash::generate("same", 1000);
        let b = PasswordHash::generate("same", 1000);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn derive_matches_reference_vector() {
        // RFC 7914 §11 PBKDF2-HMAC-SHA256 测试向量（c = 1）
        let out = derive("passwd", b"salt", 1);
        assert_eq!(
            out[..8],
            [0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f]
        );
    }
}
