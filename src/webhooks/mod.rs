//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Parsing of `pull_request`, `push` and `check_run` deliveries
//! - The final plan/apply/ignore decision once repository config is known

pub mod events;
pub mod parser;
pub mod signature;

pub use events::TriggerEvent;
pub use parser::{ParseError, parse_webhook};
pub use signature::{SIGNATURE_HEADER, SignatureError, verify_signature};
