//! Canonicalization of caller-supplied product identifiers.
//!
//! Accepts a bare canonical id (`MLB1234`), a hyphenated variant
//! (`MLB-1234`), a bare numeric string, or a full marketplace URL containing
//! an identifier, and produces the canonical `{SITE}{digits}` form.
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static CANONICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{3}\d+$").unwrap());
static HYPHENATED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z]{3})-(\d+)$").unwrap());
static IN_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z]{3})-?(\d+)").unwrap());
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty product identifier")]
    Empty,
    #[error("no product identifier found in URL '{0}'")]
    NoIdInUrl(String),
    #[error("unrecognized product identifier '{0}'")]
    Unrecognized(String),
}

/// Normalize a raw identifier to `{SITE}{digits}`. Pure and total: every
/// input either normalizes or fails with a typed error.
pub fn normalize(raw: &str, default_site: &str) -> Result<String, NormalizeError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(NormalizeError::Empty);
    }

    // URLs are only mined for an embedded identifier, never normalized
    // further.
    if s.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("http")) {
        return match IN_URL.captures(s) {
            Some(caps) => Ok(format!(
                "{}{}",
                caps[1].to_ascii_uppercase(),
                &caps[2]
            )),
            None => Err(NormalizeError::NoIdInUrl(s.to_string())),
        };
    }

    if let Some(caps) = HYPHENATED.captures(s) {
        return Ok(format!("{}{}", caps[1].to_ascii_uppercase(), &caps[2]));
    }

    if CANONICAL.is_match(s) {
        return Ok(s.to_ascii_uppercase());
    }

    if DIGITS.is_match(s) {
        return Ok(format!("{}{}", default_site, s));
    }

    Err(NormalizeError::Unrecognized(s.to_string()))
}

/// Split a canonical identifier into its site prefix and numeric part.
/// Returns `None` for identifiers that are not in canonical form.
pub fn split_canonical(id: &str) -> Option<(&str, &str)> {
    if CANONICAL.is_match(id) {
        Some(id.split_at(3))
    } else {
        None
    }
}
