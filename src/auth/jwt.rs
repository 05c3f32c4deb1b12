/// JWT Token Generation and Validation
///
/// `TokenCodec` signs and verifies bearer tokens. It is pure over the claims,
/// the shared secret and the clock: revocation lives in the registry.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::fmt;
use std::str::FromStr;

use crate::auth::claims::{Claims, Subject, TokenKind};
use crate::configuration::JwtSettings;
use crate::error::{AppError, ConfigError};

const MIN_SECRET_LENGTH: usize = 32;

/// A freshly signed token together with what the registry needs to record it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
    pub jti: Option<String>,
}

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidToken {
    /// Signature mismatch, wrong issuer or unparseable payload.
    Malformed,
    WrongKind { expected: TokenKind, found: TokenKind },
    Expired,
}

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidToken::Malformed => write!(f, "malformed token or bad signature"),
            InvalidToken::WrongKind { expected, found } => {
                write!(f, "expected {} token, got {}", expected, found)
            }
            InvalidToken::Expired => write!(f, "token has expired"),
        }
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from configuration.
    ///
    /// # Errors
    /// Returns a configuration error for non-HMAC algorithms, short secrets or
    /// non-positive lifetimes.
    pub fn new(config: &JwtSettings) -> Result<Self, AppError> {
        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            ConfigError::InvalidValue(format!("unknown JWT algorithm {}", config.algorithm))
        })?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ConfigError::InvalidValue(format!(
                "JWT algorithm {} needs a key pair; only HMAC algorithms are supported",
                config.algorithm
            ))
            .into());
        }
        if config.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "JWT secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            ))
            .into());
        }
        if config.access_token_expiry <= 0 || config.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue("token lifetimes must be positive".to_string()).into());
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            algorithm,
            issuer: config.issuer.clone(),
            access_ttl: Duration::seconds(config.access_token_expiry),
            refresh_ttl: Duration::seconds(config.refresh_token_expiry),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token for `subject` that expires after `ttl`.
    ///
    /// # Errors
    /// Only on signing failure, which is fatal.
    pub fn issue_access(&self, subject: &Subject, ttl: Duration) -> Result<IssuedToken, AppError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let claims = Claims::access(subject, now.timestamp(), expires_at.timestamp(), &self.issuer);

        Ok(IssuedToken {
            token: self.sign(&claims)?,
            kind: TokenKind::Access,
            expires_at: timestamp_to_datetime(claims.exp),
            jti: None,
        })
    }

    /// Sign a refresh token for `subject` with a fresh random `jti`.
    ///
    /// # Errors
    /// Only on signing failure, which is fatal.
    pub fn issue_refresh(&self, subject: &Subject, ttl: Duration) -> Result<IssuedToken, AppError> {
        let now = Utc::now();
        let expires_at = now + ttl;
        let jti = uuid::Uuid::new_v4().simple().to_string();
        let claims = Claims::refresh(
            subject,
            now.timestamp(),
            expires_at.timestamp(),
            &self.issuer,
            jti.clone(),
        );

        Ok(IssuedToken {
            token: self.sign(&claims)?,
            kind: TokenKind::Refresh,
            expires_at: timestamp_to_datetime(claims.exp),
            jti: Some(jti),
        })
    }

    /// Check signature, issuer, expiry and token kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, InvalidToken> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => InvalidToken::Expired,
                _ => {
                    tracing::debug!(error = %e, "JWT validation error");
                    InvalidToken::Malformed
                }
            })?;

        if claims.kind != expected {
            return Err(InvalidToken::WrongKind {
                expected,
                found: claims.kind,
            });
        }
        // jsonwebtoken accepts exp == now; a token is dead at its expiry instant.
        if claims.is_expired() {
            return Err(InvalidToken::Expired);
        }
        if claims.kind == TokenKind::Refresh && claims.jti.as_deref().map_or(true, str::is_empty) {
            return Err(InvalidToken::Malformed);
        }

        Ok(claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    fn subject() -> Subject {
        Subject {
            username: "john_doe".to_string(),
            user_id: 7,
            roles: vec!["developer".to_string(), "manager".to_string()],
        }
    }

    #[test]
    fn test_access_round_trip() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let issued = codec.issue_access(&subject(), Duration::minutes(5)).unwrap();

        let claims = codec.verify(&issued.token, TokenKind::Access).expect("valid token");
        assert_eq!(claims.sub, "john_doe");
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.roles, vec!["developer", "manager"]);
        assert_eq!(claims.exp, issued.expires_at.timestamp());
        assert!(issued.jti.is_none());
    }

    #[test]
    fn test_refresh_round_trip_carries_jti() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let issued = codec.issue_refresh(&subject(), Duration::days(1)).unwrap();

        let claims = codec.verify(&issued.token, TokenKind::Refresh).unwrap();
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(issued.jti.as_ref().map(String::len), Some(32));
        assert!(claims.roles.is_empty());
    }

    #[test]
    fn test_refresh_jti_is_fresh_each_time() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let a = codec.issue_refresh(&subject(), Duration::days(1)).unwrap();
        let b = codec.issue_refresh(&subject(), Duration::days(1)).unwrap();
        assert_ne!(a.jti, b.jti);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let access = codec.issue_access(&subject(), Duration::minutes(5)).unwrap();
        let refresh = codec.issue_refresh(&subject(), Duration::minutes(5)).unwrap();

        assert_eq!(
            codec.verify(&access.token, TokenKind::Refresh),
            Err(InvalidToken::WrongKind {
                expected: TokenKind::Refresh,
                found: TokenKind::Access
            })
        );
        assert!(codec.verify(&refresh.token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let issued = codec.issue_access(&subject(), Duration::seconds(-5)).unwrap();

        assert_eq!(codec.verify(&issued.token, TokenKind::Access), Err(InvalidToken::Expired));
    }

    #[test]
    fn test_tampered_token() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let issued = codec.issue_access(&subject(), Duration::minutes(5)).unwrap();

        let tampered = format!("{}X", issued.token);
        assert_eq!(codec.verify(&tampered, TokenKind::Access), Err(InvalidToken::Malformed));
        assert_eq!(
            codec.verify("invalid.token.here", TokenKind::Access),
            Err(InvalidToken::Malformed)
        );
    }

    #[test]
    fn test_wrong_secret_and_issuer() {
        let codec = TokenCodec::new(&get_test_config()).unwrap();
        let issued = codec.issue_access(&subject(), Duration::minutes(5)).unwrap();

        let mut other = get_test_config();
        other.secret = "another-secret-key-that-is-also-32-bytes".to_string();
        let other_codec = TokenCodec::new(&other).unwrap();
        assert!(other_codec.verify(&issued.token, TokenKind::Access).is_err());

        let mut other = get_test_config();
        other.issuer = "wrong-issuer".to_string();
        let other_codec = TokenCodec::new(&other).unwrap();
        assert!(other_codec.verify(&issued.token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = get_test_config();
        config.secret = "short".to_string();
        assert!(TokenCodec::new(&config).is_err());

        let mut config = get_test_config();
        config.algorithm = "RS256".to_string();
        assert!(TokenCodec::new(&config).is_err());

        let mut config = get_test_config();
        config.algorithm = "HS512".to_string();
        let codec = TokenCodec::new(&config).unwrap();
        let issued = codec.issue_access(&subject(), Duration::minutes(1)).unwrap();
        assert!(codec.verify(&issued.token, TokenKind::Access).is_ok());
    }
}
