//! 口令哈希

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hms_core::{HmsError, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

/// 默认迭代次数
pub const DEFAULT_ITERATIONS: u32 = 210_000;

/// 口令哈希协作方：单向哈希与校验
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;

    fn verify(&self, password: &str, encoded: &str) -> Result<bool>;
}

/// PBKDF2-SHA256 实现，编码格式 `pbkdf2-sha256$迭代次数$盐$哈希`
#[derive(Debug, Clone)]
pub struct Pbkdf2PasswordHasher {
    iterations: u32,
}

impl Pbkdf2PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
        let mut out = [0u8; HASH_LENGTH];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
        out
    }
}

impl Default for Pbkdf2PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher for Pbkdf2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(HmsError::Validation("password is required".to_string()));
        }

        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = Self::derive(password, &salt, self.iterations);

        Ok(format!(
            "{}${}${}${}",
            SCHEME,
            self.iterations,
            STANDARD.encode(salt),
            STANDARD.encode(hash)
        ))
    }

    fn verify(&self, password: &str, encoded: &str) -> Result<bool> {
        let parts: Vec<&str> = encoded.split('$').collect();
        if parts.len() != 4 || parts[0] != SCHEME {
            return Err(HmsError::Internal("unrecognised password hash format".to_string()));
        }

        let iterations: u32 = parts[1]
            .parse()
            .map_err(|_| HmsError::Internal("invalid hash iteration count".to_string()))?;
        let salt = STANDARD
            .decode(parts[2])
            .map_err(|e| HmsError::Internal(format!("invalid hash salt: {}", e)))?;
        let expected = STANDARD
            .decode(parts[3])
            .map_err(|e| HmsError::Internal(format!("invalid hash digest: {}", e)))?;

        let computed = Self::derive(password, &salt, iterations);
        Ok(bool::from(computed.as_slice().ct_eq(expected.as_slice())))
    }
}
