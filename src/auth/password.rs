use anyhow::anyhow;
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::error;

const DUMMY_PASSWORD: &str = "not-a-real-password";

lazy_static! {
    // Verified against when no account matched, so unknown emails cost the
    // same as wrong passwords.
    static ref DUMMY_HASH: Option<String> = hash_password(DUMMY_PASSWORD).ok();
}

pub const MIN_PASSWORD_LEN: usize = 8;

/// PHC-encoded argon2id hash with a fresh OS salt.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!(error = %e, "password hashing failed");
            anyhow!("argon2 hash: {e}")
        })
}

/// `Ok(false)` on a plain mismatch. A stored hash that cannot be parsed or
/// checked is an error, not a failed login.
pub fn verify_password(plain: &str, stored_hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!(error = %e, "stored password hash is malformed");
        anyhow!("argon2 parse: {e}")
    })?;
    match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow!("argon2 verify: {e}")),
    }
}

/// Burns one verification against a fixed hash; the result is discarded.
pub fn equalize_timing(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}
