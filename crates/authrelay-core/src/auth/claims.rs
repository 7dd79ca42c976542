//! Unverified JWT claims inspection.
//!
//! Only the claims segment is decoded; the signature is never checked.
//! The result is a client-side hint for scheduling refreshes and must not be
//! used as a security decision. The server stays authoritative.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// Registered claims used for scheduling. Everything else in the payload is
/// ignored, and a claim of an unexpected type reads as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    /// Expiry as seconds since the Unix epoch
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    /// Subject; numeric ids are kept in their decimal form
    pub sub: Option<String>,
}

impl TokenClaims {
    /// Decode the claims segment of a bearer token.
    ///
    /// Returns `None` for anything that is not a three-segment token with a
    /// base64url JSON object payload.
    pub fn decode(token: &str) -> Option<Self> {
        let mut segments = token.split('.');
        let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims = match serde_json::from_slice::<Value>(&bytes).ok()? {
            Value::Object(claims) => claims,
            _ => return None,
        };

        Some(Self {
            exp: claims.get("exp").and_then(numeric_date),
            iat: claims.get("iat").and_then(numeric_date),
            sub: claims.get("sub").and_then(|sub| match sub {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
        })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }
}

/// JWT NumericDate: whole or fractional seconds, truncated to whole seconds.
fn numeric_date(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|secs| secs.is_finite() && secs.abs() < i64::MAX as f64)
            .map(|secs| secs as i64)
    })
}

/// True if the token is absent, undecodable, has no expiry, or expires
/// within `buffer` of `now`.
pub fn is_expired_at(token: Option<&str>, buffer: Duration, now: DateTime<Utc>) -> bool {
    match token.and_then(TokenClaims::decode).and_then(|c| c.expires_at()) {
        Some(expiry) => now >= expiry - buffer,
        None => true,
    }
}

/// Time left before the token's expiry, `None` if it cannot be determined.
/// Already-expired tokens report a zero duration.
pub fn time_until_expiry_at(token: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let expiry = token.and_then(TokenClaims::decode)?.expires_at()?;
    Some((expiry - now).max(Duration::zero()))
}

#[cfg(test)]
pub(crate) fn make_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_claims() {
        let token = make_token(json!({"exp": 1_900_000_000, "sub": "user-42"}));
        let claims = TokenClaims::decode(&token).expect("claims should decode");
        assert_eq!(claims.exp, Some(1_900_000_000));
        assert_eq!(claims.sub.as_deref(), Some("user-42"));
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert!(TokenClaims::decode("").is_none());
        assert!(TokenClaims::decode("opaque-token").is_none());
        assert!(TokenClaims::decode("a.b").is_none());
        assert!(TokenClaims::decode("a.!!!.c").is_none());
        assert!(TokenClaims::decode("a.b.c.d").is_none());
        // Valid base64 but not JSON
        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("hello"));
        assert!(TokenClaims::decode(&not_json).is_none());
        let not_object = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(TokenClaims::decode(&not_object).is_none());
    }

    #[test]
    fn test_decode_tolerates_unexpected_claim_types() {
        let now = Utc::now();
        let exp = (now + Duration::hours(1)).timestamp();
        let token = make_token(json!({"exp": exp, "sub": 42, "iat": 1_700_000_000.5, "aud": ["a"]}));

        let claims = TokenClaims::decode(&token).expect("claims should decode");
        assert_eq!(claims.exp, Some(exp));
        assert_eq!(claims.iat, Some(1_700_000_000));
        assert_eq!(claims.sub.as_deref(), Some("42"));
        assert!(!is_expired_at(Some(&token), Duration::minutes(5), now));
        assert!(time_until_expiry_at(Some(&token), now).is_some());

        // Fractional expiry
        let fractional = make_token(json!({"exp": exp as f64 + 0.25}));
        assert_eq!(TokenClaims::decode(&fractional).and_then(|c| c.exp), Some(exp));

        // A non-numeric expiry is treated as missing
        let bad_exp = make_token(json!({"exp": "tomorrow", "sub": "u"}));
        let claims = TokenClaims::decode(&bad_exp).expect("claims should decode");
        assert_eq!(claims.exp, None);
        assert!(is_expired_at(Some(&bad_exp), Duration::zero(), now));
    }

    #[test]
    fn test_is_expired_with_buffer() {
        let now = Utc::now();
        let exp = (now + Duration::minutes(10)).timestamp();
        let token = make_token(json!({ "exp": exp }));

        assert!(!is_expired_at(Some(&token), Duration::minutes(5), now));
        assert!(is_expired_at(Some(&token), Duration::minutes(15), now));
    }

    #[test]
    fn test_is_expired_conservative_defaults() {
        let now = Utc::now();
        assert!(is_expired_at(None, Duration::zero(), now));
        assert!(is_expired_at(Some("garbage"), Duration::zero(), now));

        let no_exp = make_token(json!({"sub": "x"}));
        assert!(is_expired_at(Some(&no_exp), Duration::zero(), now));
    }

    #[test]
    fn test_time_until_expiry() {
        let now = Utc::now();
        let token = make_token(json!({ "exp": (now + Duration::seconds(90)).timestamp() }));
        let remaining = time_until_expiry_at(Some(&token), now).expect("has expiry");
        assert!(remaining <= Duration::seconds(90));
        assert!(remaining > Duration::seconds(88));

        let past = make_token(json!({ "exp": (now - Duration::hours(1)).timestamp() }));
        assert_eq!(time_until_expiry_at(Some(&past), now), Some(Duration::zero()));

        assert_eq!(time_until_expiry_at(Some("garbage"), now), None);
    }
}
