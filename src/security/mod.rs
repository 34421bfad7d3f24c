//! Security utilities.
//!
//! This module provides credential scrubbing so that passwords and key
//! paths never end up in log output.

pub mod credential_scrubber;

pub use credential_scrubber::{redact_secret, scrub_credentials};
