//! Authentication predicate for the status-event webhook.
//!
//! Two modes mirror the push channel's options: a shared verification
//! token in a dedicated header, or a bearer identity token. Cryptographic
//! signature verification for identity tokens happens at the transport
//! edge (the platform in front of this service); here only the decoded
//! claims are matched against configured expectations, producing the
//! boolean the handler consumes.

use anyhow::{Result, bail};
use axum::http::HeaderMap;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::{AuthMode, Config};

pub const VERIFICATION_TOKEN_HEADER: &str = "x-goog-pubsub-verification-token";

#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Shared-secret header, compared in constant time.
    Token { verification_token: String },
    /// Bearer identity token with claim expectations.
    IdentityToken {
        expected_audience: String,
        expected_issuer: String,
        expected_service_account_email: Option<String>,
    },
    /// No authentication (local development only).
    Open,
}

impl AuthPolicy {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.auth_mode {
            AuthMode::Token => Ok(AuthPolicy::Token {
                verification_token: config.verification_token.clone(),
            }),
            AuthMode::IdentityToken => {
                if config.expected_audience.is_empty() {
                    bail!("AUTH_MODE=identity_token requires PUBSUB_EXPECTED_AUDIENCE");
                }
                Ok(AuthPolicy::IdentityToken {
                    expected_audience: config.expected_audience.clone(),
                    expected_issuer: config.expected_issuer.clone(),
                    expected_service_account_email: Some(
                        config.expected_service_account_email.clone(),
                    )
                    .filter(|email| !email.is_empty()),
                })
            }
            AuthMode::Disabled => Ok(AuthPolicy::Open),
        }
    }

    /// Decide whether this request may deliver status events.
    pub fn authenticate(&self, headers: &HeaderMap) -> bool {
        match self {
            AuthPolicy::Open => true,
            AuthPolicy::Token { verification_token } => {
                if verification_token.is_empty() {
                    // An unset secret rejects everything rather than
                    // accepting everything.
                    return false;
                }
                let Some(provided) = headers
                    .get(VERIFICATION_TOKEN_HEADER)
                    .and_then(|value| value.to_str().ok())
                else {
                    return false;
                };
                provided
                    .as_bytes()
                    .ct_eq(verification_token.as_bytes())
                    .into()
            }
            AuthPolicy::IdentityToken {
                expected_audience,
                expected_issuer,
                expected_service_account_email,
            } => {
                let Some(token) = headers
                    .get(axum::http::header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.strip_prefix("Bearer "))
                else {
                    return false;
                };
                match check_identity_claims(
                    token,
                    expected_audience,
                    expected_issuer,
                    expected_service_account_email.as_deref(),
                ) {
                    Ok(()) => true,
                    Err(reason) => {
                        warn!(reason, "identity token rejected");
                        false
                    }
                }
            }
        }
    }
}

/// Match the token's claims against expectations. The signature was
/// already verified upstream; an unparseable token still fails closed.
fn check_identity_claims(
    token: &str,
    expected_audience: &str,
    expected_issuer: &str,
    expected_service_account_email: Option<&str>,
) -> Result<(), &'static str> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err("token is not a three-segment JWT");
    };
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| "claims segment is not base64url")?;
    let claims: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|_| "claims segment is not JSON")?;

    if claims.get("aud").and_then(|aud| aud.as_str()) != Some(expected_audience) {
        return Err("audience mismatch");
    }
    if claims.get("iss").and_then(|iss| iss.as_str()) != Some(expected_issuer) {
        return Err("issuer mismatch");
    }
    if let Some(expected_email) = expected_service_account_email {
        let email = claims.get("email").and_then(|email| email.as_str());
        let subject = claims.get("sub").and_then(|sub| sub.as_str());
        if email != Some(expected_email) && subject != Some(expected_email) {
            return Err("service account mismatch");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn token_policy(secret: &str) -> AuthPolicy {
        AuthPolicy::Token {
            verification_token: secret.to_string(),
        }
    }

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::try_from(name).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    fn jwt_with_claims(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn matching_token_authenticates() {
        let policy = token_policy("s3cret");
        let headers = headers_with(VERIFICATION_TOKEN_HEADER, "s3cret");
        assert!(policy.authenticate(&headers));
    }

    #[test]
    fn wrong_or_missing_token_is_rejected() {
        let policy = token_policy("s3cret");
        assert!(!policy.authenticate(&HeaderMap::new()));
        let headers = headers_with(VERIFICATION_TOKEN_HEADER, "guess");
        assert!(!policy.authenticate(&headers));
    }

    #[test]
    fn empty_configured_secret_rejects_everything() {
        let policy = token_policy("");
        let headers = headers_with(VERIFICATION_TOKEN_HEADER, "");
        assert!(!policy.authenticate(&headers));
    }

    #[test]
    fn open_policy_always_authenticates() {
        assert!(AuthPolicy::Open.authenticate(&HeaderMap::new()));
    }

    #[test]
    fn identity_token_checks_audience_and_issuer() {
        let policy = AuthPolicy::IdentityToken {
            expected_audience: "https://scheduler.example".to_string(),
            expected_issuer: "https://accounts.google.com".to_string(),
            expected_service_account_email: None,
        };

        let good = jwt_with_claims(json!({
            "aud": "https://scheduler.example",
            "iss": "https://accounts.google.com",
        }));
        let headers = headers_with("authorization", &format!("Bearer {good}"));
        assert!(policy.authenticate(&headers));

        let wrong_aud = jwt_with_claims(json!({
            "aud": "https://other.example",
            "iss": "https://accounts.google.com",
        }));
        let headers = headers_with("authorization", &format!("Bearer {wrong_aud}"));
        assert!(!policy.authenticate(&headers));

        assert!(!policy.authenticate(&headers_with("authorization", "Bearer not-a-jwt")));
        assert!(!policy.authenticate(&HeaderMap::new()));
    }

    #[test]
    fn identity_token_service_account_matches_email_or_sub() {
        let policy = AuthPolicy::IdentityToken {
            expected_audience: "aud".to_string(),
            expected_issuer: "iss".to_string(),
            expected_service_account_email: Some("fleet@example.iam".to_string()),
        };

        let by_email = jwt_with_claims(json!({
            "aud": "aud", "iss": "iss", "email": "fleet@example.iam",
        }));
        assert!(policy.authenticate(&headers_with("authorization", &format!("Bearer {by_email}"))));

        let by_sub = jwt_with_claims(json!({
            "aud": "aud", "iss": "iss", "sub": "fleet@example.iam",
        }));
        assert!(policy.authenticate(&headers_with("authorization", &format!("Bearer {by_sub}"))));

        let neither = jwt_with_claims(json!({
            "aud": "aud", "iss": "iss", "email": "someone@else",
        }));
        assert!(!policy.authenticate(&headers_with("authorization", &format!("Bearer {neither}"))));
    }
}
