//! Trust boundary between Codecks content and the agent.
//!
//! Inbound: caller text is validated and stripped of control characters.
//! Outbound: user-authored fields are tagged and scanned for injection.

pub mod guard;
pub mod validate;

pub use guard::{
    USER_DATA_CLOSE, USER_DATA_OPEN, WARNINGS_KEY, detect_injection, sanitize_card,
    sanitize_cards, sanitize_fields, tag_text, tag_user_content,
};
pub use validate::{
    strip_control_chars, validate_identifier, validate_identifiers, validate_optional_text,
    validate_text,
};
