//! Shared-secret authentication for the scheduler trigger.
use axum::http::{header, HeaderMap};
use constant_time_eq::constant_time_eq;
use thiserror::Error;

/// Alternate single-purpose header carrying the raw secret.
pub const SECRET_HEADER: &str = "x-scheduler-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing trigger credential")]
    Missing,
    #[error("invalid trigger credential")]
    Mismatch,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

fn secret_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SECRET_HEADER)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Accept the request if either credential header carries `expected`.
pub fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), AuthError> {
    let presented: Vec<&str> = [bearer(headers), secret_header(headers)]
        .into_iter()
        .flatten()
        .collect();
    if presented.is_empty() {
        return Err(AuthError::Missing);
    }
    let matches = |p: &&str| constant_time_eq(p.as_bytes(), expected.as_bytes());
    if !expected.is_empty() && presented.iter().any(matches) {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}
