//! Cryptographic primitives: password hashing, credential encryption, and
//! signed access tokens.
//!
//! Passwords use bcrypt (cost-parameterized, salt stored inline in the
//! hash). Upstream credentials are sealed with ChaCha20-Poly1305 under a
//! process-wide key derived from configured key material; the random
//! 12-byte nonce is prepended to the ciphertext and the whole blob is
//! base64-encoded for TEXT storage. Access tokens are HS256 JWTs; refresh
//! tokens are opaque database rows and never pass through here.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use opsdec_core::{AuthUserId, Error, Result};

/// Nonce size for ChaCha20-Poly1305 (96 bits).
const NONCE_SIZE: usize = 12;

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

/// Hash a password with bcrypt. Minimum length is enforced by callers.
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
        .map_err(|e| Error::Crypto(format!("bcrypt error: {e}")))
}

/// Verify a password against a stored bcrypt hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Generate a random 64-hex-char secret, suitable for
/// `OPSDEC_TOKEN_SECRET` / `OPSDEC_ENCRYPTION_KEY`.
pub fn generate_secret() -> String {
    use rand::Rng;
    let mut buf = [0u8; 32];
    rand::thread_rng().fill(&mut buf);
    hex::encode(buf)
}

// ---------------------------------------------------------------------------
// Credential encryption
// ---------------------------------------------------------------------------

/// Authenticated encryption for stored upstream credentials.
pub struct CredentialCipher {
    cipher: ChaCha20Poly1305,
}

impl CredentialCipher {
    /// Build a cipher from arbitrary key material. The material is run
    /// through SHA-256 so any string works as configuration.
    pub fn new(key_material: &str) -> Self {
        let key = Sha256::digest(key_material.as_bytes());
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .expect("SHA-256 digest is always a valid 32-byte key");
        Self { cipher }
    }

    /// Encrypt a credential for storage: base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encrypt failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored credential blob.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let bytes = BASE64
            .decode(blob)
            .map_err(|e| Error::Crypto(format!("bad credential blob: {e}")))?;
        if bytes.len() <= NONCE_SIZE {
            return Err(Error::Crypto("credential blob too short".into()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Crypto(format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| Error::Crypto(format!("non-UTF8 credential: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Access tokens
// ---------------------------------------------------------------------------

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessClaims {
    /// Operator account id.
    pub sub: AuthUserId,
    pub username: String,
    pub is_admin: bool,
    /// Issued-at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

/// Token verification failures, distinguished so the API can report
/// expiry separately from tampering.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("token malformed")]
    Malformed,
}

/// Mints and verifies HS256-signed access tokens.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Mint an access token valid for `ttl_mins` minutes.
    pub fn mint_access(
        &self,
        user_id: AuthUserId,
        username: &str,
        is_admin: bool,
        ttl_mins: i64,
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id,
            username: username.to_string(),
            is_admin,
            iat: now,
            exp: now + ttl_mins * 60,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Crypto(format!("token mint failed: {e}")))
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str) -> std::result::Result<AccessClaims, TokenError> {
        match jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenError::Expired),
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::Base64(_)
                | jsonwebtoken::errors::ErrorKind::Json(_)
                | jsonwebtoken::errors::ErrorKind::Utf8(_) => Err(TokenError::Malformed),
                _ => Err(TokenError::Invalid),
            },
        }
    }
}
