//! Credential scrubbing utilities for preventing sensitive data exposure.
//!
//! Remote errors and target descriptions pass through here before they are
//! logged, so a password that ends up in a message never reaches a log file
//! that is later uploaded alongside the images.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex patterns for detecting credentials in free text
    static ref CREDENTIAL_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // Generic passwords
        (Regex::new(r"(?i)(password|passwd|pwd|pw)\s*[:=]\s*([^\s]+)").unwrap(),
         "$1=<REDACTED_PASSWORD>"),

        // user:password@ in sftp/ssh/ftp URLs
        (Regex::new(r"(?i)((?:s?ftps?|ssh)://)([^:/@\s]+):([^@\s]+)@").unwrap(),
         "$1$2:<REDACTED_PASS>@"),

        // Private key paths
        (Regex::new(r"(?i)(private[_-]?key|ssh[_-]?key|key[_-]?file)\s*[:=]\s*([^\s]+)").unwrap(),
         "$1=<REDACTED_KEY_PATH>"),
    ];
}

/// Scrub credentials from a string.
///
/// # Example
///
/// ```
/// use lapse_relay::security::credential_scrubber::scrub_credentials;
///
/// let input = "Failed to connect with password=secret123";
/// let scrubbed = scrub_credentials(input);
/// assert_eq!(scrubbed, "Failed to connect with password=<REDACTED_PASSWORD>");
/// ```
pub fn scrub_credentials(input: &str) -> String {
    let mut result = input.to_string();

    for (pattern, replacement) in CREDENTIAL_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Replace every literal occurrence of a known secret, then apply the
/// generic patterns.
pub fn redact_secret(input: &str, secret: Option<&str>) -> String {
    let result = match secret {
        Some(secret) if !secret.is_empty() => input.replace(secret, "<REDACTED>"),
        _ => input.to_string(),
    };
    scrub_credentials(&result)
}
