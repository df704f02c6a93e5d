//! Bearer token issuance and validation.
//!
//! Tokens are compact HS256 JWS strings:
//!
//! ```text
//! b64url({"alg":"HS256","typ":"JWT"}) . b64url(claims) . b64url(HMAC-SHA256(secret, header.claims))
//! ```
//!
//! Each token carries a salt derived from the account identity and the
//! signing secret. Rotating the secret or changing the identity invalidates
//! every token issued before, with no revocation list to keep.

use crate::config::AuthConfig;
use crate::storage::Account;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sync_types::AccountId;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// The only accepted signing algorithm.
pub const ALGORITHM: &str = "HS256";

/// Claims embedded in every token. All fields are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account the token was issued to.
    pub account_id: AccountId,
    /// Identity string at issuance.
    pub identity: String,
    /// Admin role at issuance.
    pub is_admin: bool,
    /// `hex(HMAC-SHA256(secret, identity))`.
    pub salt: String,
    /// Expiry as a Unix timestamp (seconds).
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Token errors. Callers collapse these into [`crate::error::AuthError`].
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Wrong segment count, bad base64, or a header/claims body that does
    /// not decode (including missing claims).
    #[error("malformed token")]
    Malformed,

    /// Header names an algorithm other than HS256.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature does not match.
    #[error("invalid signature")]
    InvalidSignature,

    /// `exp` is not in the future.
    #[error("token expired")]
    Expired,

    /// Claims could not be encoded at issuance.
    #[error("token encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The secret was rejected by the MAC.
    #[error("invalid signing key")]
    InvalidKey,
}

impl From<TokenError> for crate::error::AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::UnsupportedAlgorithm(_) => Self::UnsupportedAlgorithm,
            _ => Self::InvalidSignatureOrExpired,
        }
    }
}

/// HMAC key for tokens and salts, wiped from memory on drop.
#[derive(Clone)]
pub struct SigningSecret(Zeroizing<Vec<u8>>);

impl SigningSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.0).map_err(|_| TokenError::InvalidKey)
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningSecret([REDACTED])")
    }
}

/// Mints and verifies bearer tokens.
///
/// Pure apart from the clock: no storage access, no mutable state.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    secret: SigningSecret,
    ttl_secs: i64,
}

impl TokenIssuer {
    /// Create an issuer with the given secret and token lifetime.
    pub fn new(secret: SigningSecret, ttl_secs: u64) -> Self {
        Self {
            secret,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Create an issuer from the `[auth]` configuration section.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            SigningSecret::new(config.signing_secret.as_bytes()),
            config.token_ttl_secs,
        )
    }

    /// Derive the revocation salt for an identity.
    pub fn derive_salt(&self, identity: &str) -> Result<String, TokenError> {
        let mut mac = self.secret.mac()?;
        mac.update(identity.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Issue a token for `account`, valid for the configured lifetime.
    pub fn issue(&self, account: &Account) -> Result<String, TokenError> {
        self.issue_at(account, chrono::Utc::now().timestamp())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(&self, account: &Account, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            account_id: account.id,
            identity: account.identity.clone(),
            is_admin: account.is_admin,
            salt: self.derive_salt(&account.identity)?,
            exp: now.saturating_add(self.ttl_secs),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
        );

        let mut mac = self.secret.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Validate a token against the current time.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, chrono::Utc::now().timestamp())
    }

    /// Validate a token as if the current time were `now`.
    ///
    /// The algorithm is checked before the signature so that a token naming
    /// `none` or an asymmetric scheme is never verified with the HMAC key.
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };
        if header_b64.is_empty() || claims_b64.is_empty() || signature_b64.is_empty() {
            return Err(TokenError::Malformed);
        }

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::InvalidSignature)?;
        let mut mac = self.secret.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use chrono::Utc;

    const SECRET: &[u8] = b"test-signing-secret-0123456789abcdef";
    const NOW: i64 = 1_700_000_000;
    const TTL: u64 = 72 * 3600;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SigningSecret::new(SECRET), TTL)
    }

    fn account(is_admin: bool) -> Account {
        Account {
            id: AccountId::new(),
            identity: "alice@example.com".to_string(),
            password_hash: String::new(),
            is_admin,
            created_at: Utc::now(),
        }
    }

    /// Build a token with an arbitrary header and claims body, signed with SECRET.
    fn forge(header: &serde_json::Value, claims: &serde_json::Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        let mut mac = HmacSha256::new_from_slice(SECRET).unwrap();
        mac.update(input.as_bytes());
        format!("{}.{}", input, URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn issued_token_validates_with_matching_claims() {
        let issuer = issuer();
        let acct = account(true);

        let token = issuer.issue_at(&acct, NOW).unwrap();
        let claims = issuer.validate_at(&token, NOW + 1).unwrap();

        assert_eq!(claims.account_id, acct.id);
        assert_eq!(claims.identity, acct.identity);
        assert!(claims.is_admin);
        assert_eq!(claims.exp, NOW + TTL as i64);
        assert_eq!(claims.salt, issuer.derive_salt(&acct.identity).unwrap());
    }

    #[test]
    fn token_has_three_segments_and_hs256_header() {
        let token = issuer().issue_at(&account(false), NOW).unwrap();
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "HS256");
    }

    #[test]
    fn flipping_any_signature_byte_is_detected() {
        let issuer = issuer();
        let token = issuer.issue_at(&account(false), NOW).unwrap();
        let sig_start = token.rfind('.').unwrap() + 1;

        for i in sig_start..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();

            assert!(
                issuer.validate_at(&tampered, NOW).is_err(),
                "tampered byte {} accepted",
                i
            );
        }
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let issuer = issuer();
        let token = issuer.issue_at(&account(false), NOW).unwrap();
        let segments: Vec<&str> = token.split('.').collect();

        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[1]).unwrap()).unwrap();
        claims["is_admin"] = serde_json::Value::Bool(true);
        let forged = format!(
            "{}.{}.{}",
            segments[0],
            URL_SAFE_NO_PAD.encode(claims.to_string()),
            segments[2]
        );

        assert!(matches!(
            issuer.validate_at(&forged, NOW),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = issuer();
        let token = issuer.issue_at(&account(false), NOW).unwrap();

        let expiry = NOW + TTL as i64;
        assert!(issuer.validate_at(&token, expiry - 1).is_ok());
        assert!(matches!(
            issuer.validate_at(&token, expiry),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            issuer.validate_at(&token, expiry + 3600),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn non_hmac_algorithm_is_rejected_even_when_signed() {
        let claims = serde_json::json!({
            "account_id": AccountId::new().to_string(),
            "identity": "alice@example.com",
            "is_admin": true,
            "salt": "00",
            "exp": NOW + 3600,
        });

        for alg in ["RS256", "ES256", "none", "HS512"] {
            let token = forge(&serde_json::json!({"alg": alg, "typ": "JWT"}), &claims);
            let err = issuer().validate_at(&token, NOW).unwrap_err();
            assert!(
                matches!(err, TokenError::UnsupportedAlgorithm(ref a) if a == alg),
                "{} accepted: {:?}",
                alg,
                err
            );
        }
    }

    #[test]
    fn unsigned_token_is_rejected() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let claims = URL_SAFE_NO_PAD.encode(r#"{"exp":9999999999}"#);
        let token = format!("{}.{}.", header, claims);

        assert!(matches!(
            issuer().validate_at(&token, NOW),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn missing_claim_is_rejected() {
        let token = forge(
            &serde_json::json!({"alg": "HS256", "typ": "JWT"}),
            &serde_json::json!({
                "account_id": AccountId::new().to_string(),
                "identity": "alice@example.com",
                "is_admin": true,
                "exp": NOW + 3600,
            }),
        );

        assert!(matches!(
            issuer().validate_at(&token, NOW),
            Err(TokenError::Malformed)
        ));
    }

    #[test]
    fn wrong_claim_type_is_rejected() {
        let token = forge(
            &serde_json::json!({"alg": "HS256"}),
            &serde_json::json!({
                "account_id": AccountId::new().to_string(),
                "identity": "alice@example.com",
                "is_admin": "yes",
                "salt": "00",
                "exp": NOW + 3600,
            }),
        );

        assert!(issuer().validate_at(&token, NOW).is_err());
    }

    #[test]
    fn token_from_other_secret_is_rejected() {
        let other = TokenIssuer::new(SigningSecret::new(b"another-secret-another-secret-xx".to_vec()), TTL);
        let token = other.issue_at(&account(false), NOW).unwrap();

        assert!(matches!(
            issuer().validate_at(&token, NOW),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let issuer = issuer();
        for token in ["", "abc", "a.b", "a.b.c.d", "..", "!!!.@@@.###"] {
            assert!(issuer.validate_at(token, NOW).is_err(), "{:?} accepted", token);
        }
    }

    #[test]
    fn salt_depends_on_identity_and_secret() {
        let a = issuer();
        let b = TokenIssuer::new(SigningSecret::new(b"another-secret-another-secret-xx".to_vec()), TTL);

        let salt = a.derive_salt("alice@example.com").unwrap();
        assert_eq!(salt.len(), 64);
        assert_eq!(salt, a.derive_salt("alice@example.com").unwrap());
        assert_ne!(salt, a.derive_salt("bob@example.com").unwrap());
        assert_ne!(salt, b.derive_salt("alice@example.com").unwrap());
    }

    #[test]
    fn token_errors_collapse_to_auth_errors() {
        assert_eq!(
            AuthError::from(TokenError::UnsupportedAlgorithm("RS256".into())),
            AuthError::UnsupportedAlgorithm
        );
        assert_eq!(
            AuthError::from(TokenError::Expired),
            AuthError::InvalidSignatureOrExpired
        );
        assert_eq!(
            AuthError::from(TokenError::Malformed),
            AuthError::InvalidSignatureOrExpired
        );
    }

    #[test]
    fn secret_debug_is_redacted() {
        let debug = format!("{:?}", issuer());
        assert!(!debug.contains("test-signing-secret"));
    }
}
