use crate::{
    config::Config,
    errors::{AppError, AppResult},
    models::{Claims, Role},
};
use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use governor::{RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::{num::NonZeroU32, sync::Arc};
use uuid::Uuid;

pub type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const REQUESTS_PER_MINUTE: NonZeroU32 = NonZeroU32::new(60).unwrap();

/// Hash a plaintext password using Argon2.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(internal)?
        .to_string();
    Ok(hash)
}

/// Verify a plaintext password against a stored hash.
///
/// # Errors
/// Returns an error if the hash format is invalid.
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(internal)?;
    let argon2 = Argon2::default();
    Ok(argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn internal(err: impl std::fmt::Display) -> AppError {
    AppError::Anyhow(anyhow!(err.to_string()))
}

fn sign(user_id: Uuid, role: Role, ttl: Duration, refresh: bool, key: &EncodingKey) -> AppResult<String> {
    let exp = usize::try_from((Utc::now() + ttl).timestamp()).map_err(internal)?;
    let claims = Claims {
        sub: user_id,
        role,
        exp,
        refresh,
    };
    encode(&Header::default(), &claims, key).map_err(|e| AppError::Anyhow(e.into()))
}

/// Issue an access/refresh token pair carrying the user's role.
///
/// # Errors
/// Returns an error if token encoding fails.
pub fn create_jwt_tokens(user_id: Uuid, role: Role, config: &Config) -> AppResult<(String, String)> {
    let key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
    let access = sign(user_id, role, Duration::minutes(15), false, &key)?;
    let refresh = sign(user_id, role, Duration::days(7), true, &key)?;
    Ok((access, refresh))
}

/// Decode and validate a JWT token.
///
/// # Errors
/// Returns Unauthorized if decoding fails.
pub fn decode_jwt(token: &str, config: &Config) -> AppResult<Claims> {
    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let data = decode::<Claims>(token, &key, &Validation::default())
        .map_err(|_| AppError::Unauthorized)?;
    Ok(data.claims)
}

/// Build a keyed rate limiter (60 requests per minute per key).
#[must_use]
pub fn build_rate_limiter() -> Arc<KeyedRateLimiter> {
    let quota = governor::Quota::per_minute(REQUESTS_PER_MINUTE);
    Arc::new(RateLimiter::keyed(quota))
}
