//! Input validation for link creation and alias registration.
//!
//! Destination URLs must be well-formed http(s); schemes that can smuggle
//! script or local-file access are rejected outright.

use url::Url;

use crate::error::{CoreError, CoreResult};

const DANGEROUS_SCHEMES: &[&str] = &[
    "javascript:",
    "data:",
    "file:",
    "vbscript:",
    "about:",
    "blob:",
];

pub const MAX_ALIAS_LEN: usize = 64;

pub fn validate_long_url(long_url: &str) -> CoreResult<()> {
    let long_url = long_url.trim();

    if long_url.is_empty() {
        return Err(CoreError::validation("URL cannot be empty"));
    }

    let lower = long_url.to_lowercase();

    for scheme in DANGEROUS_SCHEMES {
        if lower.starts_with(scheme) {
            return Err(CoreError::validation(format!(
                "scheme '{scheme}' is not allowed"
            )));
        }
    }

    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err(CoreError::validation(
            "URL must start with http:// or https://",
        ));
    }

    Url::parse(long_url)
        .map_err(|e| CoreError::validation(format!("invalid URL: {e}")))?;

    Ok(())
}

/// Alias texts are short, URL-safe tokens.
pub fn validate_alias_text(alias_text: &str) -> CoreResult<()> {
    if alias_text.is_empty() {
        return Err(CoreError::validation("alias cannot be empty"));
    }

    if alias_text.len() > MAX_ALIAS_LEN {
        return Err(CoreError::validation(format!(
            "alias longer than {MAX_ALIAS_LEN} characters"
        )));
    }

    if !alias_text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-'))
    {
        return Err(CoreError::validation(
            "alias may only contain letters, digits, '.', '_', '~' and '-'",
        ));
    }

    Ok(())
}
