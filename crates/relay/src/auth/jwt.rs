use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::AuthError;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 2 * 60 * 60;

/// Username attached to principals whose token carries none.
pub const FALLBACK_USERNAME: &str = "User";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    iat: i64,
    exp: i64,
}

/// Verified identity attached to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
}

/// HS256 verifier keyed by the process-wide secret loaded at startup.
#[derive(Clone)]
pub struct JwtCredentialVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCredentialVerifier {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_token(&self, user_id: Uuid, username: &str) -> anyhow::Result<String> {
        self.issue_token_at(user_id, Some(username), current_unix_timestamp()?)
    }

    fn issue_token_at(
        &self,
        user_id: Uuid,
        username: Option<&str>,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            username: username.map(ToOwned::to_owned),
            iat: issued_at,
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    /// Every rejection reason collapses into [`AuthError::InvalidToken`];
    /// the detail is only kept for the local debug log.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.decode_principal(token).map_err(|error| {
            tracing::debug!(error = %error, "access token rejected");
            AuthError::InvalidToken
        })
    }

    fn decode_principal(&self, token: &str) -> anyhow::Result<Principal> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode access token")?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .with_context(|| format!("access token subject '{}' is not a UUID", claims.sub))?;
        let username = claims
            .username
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_USERNAME.to_string());

        Ok(Principal { user_id, username })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{
        current_unix_timestamp, JwtCredentialVerifier, ACCESS_TOKEN_TTL_SECONDS, FALLBACK_USERNAME,
    };
    use crate::auth::AuthError;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;
    use uuid::Uuid;

    const TEST_SECRET: &str = "coedit_test_secret_that_is_definitely_long_enough";

    fn verifier() -> JwtCredentialVerifier {
        JwtCredentialVerifier::new(TEST_SECRET).expect("verifier should initialize")
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtCredentialVerifier::new("too-short").is_err());
    }

    #[test]
    fn issues_and_verifies_tokens() {
        let verifier = verifier();
        let user_id = Uuid::new_v4();

        let token = verifier.issue_token(user_id, "alice").expect("token should be issued");
        let principal = verifier.verify(&token).expect("token should verify");

        assert_eq!(principal.user_id, user_id);
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn missing_username_falls_back_to_placeholder() {
        let verifier = verifier();
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let token = verifier
            .issue_token_at(Uuid::new_v4(), None, now)
            .expect("token should be issued");

        let principal = verifier.verify(&token).expect("token should verify");
        assert_eq!(principal.username, FALLBACK_USERNAME);
    }

    #[test]
    fn rejects_tampered_tokens() {
        let verifier = verifier();
        let token = verifier.issue_token(Uuid::new_v4(), "alice").expect("token should be issued");

        assert_eq!(verifier.verify(&format!("{token}x")), Err(AuthError::InvalidToken));
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let other = JwtCredentialVerifier::new("another_secret_that_is_also_long_enough_!!")
            .expect("verifier should initialize");
        let token = other.issue_token(Uuid::new_v4(), "mallory").expect("token should be issued");

        assert_eq!(verifier().verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn rejects_expired_tokens() {
        let verifier = verifier();
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - ACCESS_TOKEN_TTL_SECONDS
            - 1;
        let token = verifier
            .issue_token_at(Uuid::new_v4(), Some("alice"), issued_at)
            .expect("token should be issued");

        assert_eq!(verifier.verify(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(verifier().verify("not-a-jwt"), Err(AuthError::InvalidToken));
        assert_eq!(verifier().verify(""), Err(AuthError::InvalidToken));
    }

    #[test]
    fn rejects_tokens_with_invalid_subject_claim() {
        #[derive(Serialize)]
        struct InvalidSubjectClaims {
            sub: &'static str,
            username: &'static str,
            iat: i64,
            exp: i64,
        }

        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let claims = InvalidSubjectClaims {
            sub: "64f0c2a9e4b0a1b2c3d4e5f6",
            username: "alice",
            iat: now,
            exp: now + ACCESS_TOKEN_TTL_SECONDS,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        assert_eq!(verifier().verify(&token), Err(AuthError::InvalidToken));
    }
}
