//! Credential hashing for the authentication handshake
//!
//! The client never sends the password itself: it sends an Argon2id hash in
//! PHC string format with a fresh random salt. The server holds the shared
//! secret and verifies the received hash against it.
//!
//! The cost of verification is fixed by the server: a hash that names any
//! algorithm, version or parameters other than the ones [`hash_credential`]
//! produces is rejected before any hashing work is done.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use thiserror::Error;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Hashing failed: {0}")]
    Hash(String),

    #[error("Verification task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Hash a password for transmission
pub fn hash_credential(password: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.trim().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Check a received hash against the shared secret
///
/// A hash that cannot be parsed is a failed verification, not an error.
pub fn verify_credential(secret: &str, received: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(received.trim()) else {
        return false;
    };
    if !has_server_cost(&parsed) {
        tracing::debug!("Rejected credential hash with foreign parameters");
        return false;
    }
    Argon2::default()
        .verify_password(secret.trim().as_bytes(), &parsed)
        .is_ok()
}

/// Whether `hash` was made with the same settings as [`hash_credential`]
fn has_server_cost(hash: &PasswordHash<'_>) -> bool {
    let algorithm = Algorithm::try_from(hash.algorithm).is_ok_and(|a| a == Algorithm::Argon2id);
    let version = hash.version == Some(u32::from(Version::V0x13));
    let params = Params::try_from(hash).is_ok_and(|params| {
        params.m_cost() == Params::DEFAULT_M_COST
            && params.t_cost() == Params::DEFAULT_T_COST
            && params.p_cost() == Params::DEFAULT_P_COST
            && params.output_len() == Some(Params::DEFAULT_OUTPUT_LEN)
    });
    algorithm && version && params
}

/// [`verify_credential`] on the blocking thread pool
pub async fn verify_credential_async(secret: String, received: String) -> AuthResult<bool> {
    Ok(tokio::task::spawn_blocking(move || verify_credential(&secret, &received)).await?)
}
