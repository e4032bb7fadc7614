//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
//! Dot-separated subject grammar with `*` (one token) and `>` (tail) wildcards.

/// Whether `subject` is usable for subscribing: non-empty, free of
/// whitespace, no empty tokens, and `>` only as the final token.
pub fn is_valid_subject(subject: &str) -> bool {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return false;
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(index, token)| {
        !token.is_empty() && (*token != ">" || index == last)
    })
}

/// Whether `subject` may be published to: valid and without wildcards.
pub fn is_valid_publish_subject(subject: &str) -> bool {
    is_valid_subject(subject) && subject.split('.').all(|token| token != "*" && token != ">")
}

/// Match a concrete subject against a subscription pattern.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
