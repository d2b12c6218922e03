// src/core/pubsub/subject.rs

//! Subject tokenization and validation.

/// The single-token wildcard.
pub const WILDCARD: &[u8] = b"*";
/// The trailing multi-token wildcard.
pub const FULL_WILDCARD: &[u8] = b">";

const SEPARATOR: u8 = b'.';

/// Splits a subject on `.` into its tokens.
pub fn tokenize(subject: &[u8]) -> Vec<&[u8]> {
    subject.split(|b| *b == SEPARATOR).collect()
}

/// Checks that `subject` is a well-formed subscription pattern: non-empty tokens,
/// no whitespace, and `>` only as the last token.
pub fn is_valid_subscription(subject: &[u8]) -> bool {
    if subject.is_empty() || subject.iter().any(u8::is_ascii_whitespace) {
        return false;
    }
    let tokens = tokenize(subject);
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, token)| {
        !token.is_empty() && (*token != FULL_WILDCARD || i == last)
    })
}

/// Checks that `subject` can be published to: a valid pattern with no wildcard
/// tokens.
pub fn is_valid_publish_subject(subject: &[u8]) -> bool {
    is_valid_subscription(subject)
        && tokenize(subject)
            .iter()
            .all(|token| *token != WILDCARD && *token != FULL_WILDCARD)
}
