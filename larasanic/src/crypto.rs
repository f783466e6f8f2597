//! Cryptographic helpers: random tokens, digests, signed data, symmetric encryption
//! and CSRF token pairs.
//!
//! Everything keyed by the application secret derives its key material from that one
//! string, so rotating `secret_key` invalidates signed cookies, CSRF tokens and encrypted
//! values at once.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::errors::Error;

pub type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Generates a url-safe random token from `bytes` bytes of entropy.
///
/// # Examples
///
/// ```
/// use larasanic::crypto::generate_token;
///
/// let token = generate_token(32);
/// assert_eq!(token.len(), 43); // base64url, no padding
/// ```
pub fn generate_token(bytes: usize) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(random_bytes(bytes))
}

/// Generates a hex encoded random secret from `bytes` bytes of entropy.
pub fn generate_secret(bytes: usize) -> String {
    hex::encode(random_bytes(bytes))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng().fill(buf.as_mut_slice());
    buf
}

/// Hex encoded SHA-256 digest of a string.
pub fn sha256(input: &str) -> String {
    sha256_bytes(input.as_bytes())
}

pub fn sha256_bytes(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Hex encoded HMAC-SHA256 of `message` keyed by `secret`.
pub fn hmac_hex(secret: &str, message: &[u8]) -> String {
    hex::encode(hmac_bytes(secret, message))
}

fn hmac_bytes(secret: &str, message: &[u8]) -> Vec<u8> {
    match <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }
        // HMAC accepts keys of any length
        Err(_) => Vec::new(),
    }
}

/// Constant-time check of a hex encoded HMAC-SHA256 signature.
pub fn verify_hmac_hex(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Signs `data` together with the current time.
///
/// The output is `base64url(data).timestamp.base64url(hmac)`, where the HMAC covers the
/// first two parts.
pub fn sign_data(data: &str, secret: &str) -> String {
    sign_data_at(data, secret, chrono::Utc::now().timestamp())
}

fn sign_data_at(data: &str, secret: &str, timestamp: i64) -> String {
    let payload = format!("{}.{timestamp}", general_purpose::URL_SAFE_NO_PAD.encode(data));
    let signature = general_purpose::URL_SAFE_NO_PAD.encode(hmac_bytes(secret, payload.as_bytes()));
    format!("{payload}.{signature}")
}

/// Verifies data produced by [`sign_data`].
///
/// Returns `None` for a bad signature, malformed input, or data older than `max_age`.
pub fn verify_signed_data(signed: &str, secret: &str, max_age: Duration) -> Option<String> {
    let (payload, signature) = signed.rsplit_once('.')?;
    let (encoded, timestamp) = payload.split_once('.')?;

    let signature = general_purpose::URL_SAFE_NO_PAD.decode(signature).ok()?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).ok()?;

    let timestamp: i64 = timestamp.parse().ok()?;
    let age = chrono::Utc::now().timestamp().saturating_sub(timestamp);
    if age < 0 || age as u64 > max_age.as_secs() {
        return None;
    }

    let data = general_purpose::URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(data).ok()
}

fn cipher_for(secret: &str) -> Result<Aes256Gcm, Error> {
    let key = Sha256::digest(secret.as_bytes());
    Aes256Gcm::new_from_slice(&key).map_err(|e| Error::Internal {
        operation: format!("create cipher: {e}"),
    })
}

/// Encrypts `plaintext` with AES-256-GCM keyed by SHA-256 of the application secret.
///
/// # Returns
///
/// base64url of `nonce || ciphertext`
pub fn encrypt(plaintext: &[u8], secret: &str) -> Result<String, Error> {
    let cipher = cipher_for(secret)?;

    let nonce_bytes = random_bytes(NONCE_LEN);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| Error::Internal {
        operation: format!("encrypt value: {e}"),
    })?;

    let mut combined = nonce_bytes;
    combined.extend_from_slice(&ciphertext);
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(combined))
}

/// Decrypts a value produced by [`encrypt`].
///
/// # Errors
///
/// Fails when the input is not base64url, is too short to hold a nonce, or does not
/// authenticate under the given secret.
pub fn decrypt(encrypted: &str, secret: &str) -> Result<Vec<u8>, Error> {
    let combined = general_purpose::URL_SAFE_NO_PAD.decode(encrypted).map_err(|e| Error::BadRequest {
        message: format!("Encrypted payload is not valid base64: {e}"),
    })?;

    if combined.len() < NONCE_LEN {
        return Err(Error::BadRequest {
            message: "Encrypted payload is too short".to_string(),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = cipher_for(secret)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| Error::BadRequest {
            message: "The payload is invalid".to_string(),
        })
}

/// Generates a CSRF pair.
///
/// The cookie is 32 random bytes, hex encoded. The token is the hex HMAC-SHA256 of the
/// cookie under the application secret. Returns `(token, cookie)`.
pub fn generate_csrf_token(secret: &str) -> (String, String) {
    let cookie = generate_secret(32);
    let token = csrf_token_for_cookie(&cookie, secret);
    (token, cookie)
}

pub fn csrf_token_for_cookie(cookie: &str, secret: &str) -> String {
    hmac_hex(secret, cookie.as_bytes())
}

/// Constant-time verification of a CSRF token against its cookie.
pub fn verify_csrf_token(token: &str, cookie: &str, secret: &str) -> bool {
    if token.is_empty() || cookie.is_empty() {
        return false;
    }
    verify_hmac_hex(secret, cookie.as_bytes(), token)
}
