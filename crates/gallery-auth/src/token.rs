//! Unsigned JWT inspection.
//!
//! Only the `exp` claim is read. Signatures are never checked; the server
//! is the authority on validity; the client only needs to know when to
//! refresh.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Why a token could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("expected 3 segments, found {0}")]
    SegmentCount(usize),

    #[error("token is not valid base64url: {0}")]
    Encoding(String),

    #[error("token header or claims are not valid JSON: {0}")]
    Claims(String),

    #[error("missing exp claim")]
    MissingExpiry,

    #[error("exp claim is not a usable timestamp")]
    InvalidExpiry,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::Base64(_) | ErrorKind::Utf8(_) => TokenError::Encoding(e.to_string()),
            ErrorKind::MissingRequiredClaim(claim) if claim == "exp" => TokenError::MissingExpiry,
            _ => TokenError::Claims(e.to_string()),
        }
    }
}

fn inspection_rules() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// Decode the expiry instant of `token`.
pub fn expiry_of(token: &str) -> Result<DateTime<Utc>, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::SegmentCount(segments.len()));
    }
    // Padded segments are tolerated.
    let unpadded = segments
        .iter()
        .map(|segment| segment.trim_end_matches('='))
        .collect::<Vec<_>>()
        .join(".");

    let data = decode::<Map<String, Value>>(
        &unpadded,
        &DecodingKey::from_secret(&[]),
        &inspection_rules(),
    )?;

    let exp = data
        .claims
        .get("exp")
        .filter(|exp| !exp.is_null())
        .ok_or(TokenError::MissingExpiry)?
        .as_f64()
        .filter(|exp| exp.is_finite())
        .ok_or(TokenError::InvalidExpiry)?;

    DateTime::from_timestamp_millis((exp * 1000.0).round() as i64).ok_or(TokenError::InvalidExpiry)
}

/// True when `token` expires at or before `now`, or cannot be decoded.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match expiry_of(token) {
        Ok(expires_at) => expires_at <= now,
        Err(_) => true,
    }
}

/// Time left before `token` expires. Zero for expired or malformed tokens.
pub fn time_to_expiry(token: &str, now: DateTime<Utc>) -> Duration {
    expiry_of(token)
        .ok()
        .and_then(|expires_at| (expires_at - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
