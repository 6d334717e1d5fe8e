//! Argon2id password hashing for the seeded admin account.

use crate::error::{DbError, DbResult};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash `password` into a PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| DbError::seed("admin", format!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Check `password` against a PHC string produced by [`hash_password`].
pub fn verify_password(password: &str, hash: &str) -> DbResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| DbError::seed("admin", format!("invalid password hash: {}", e)))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DbError::seed("admin", format!("password check failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_hash_is_error() {
        assert!(verify_password("x", "not-a-phc-string").is_err());
    }
}
