use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

pub const INVALID_HANDLE: &str = "handle.invalid";

lazy_static! {
    static ref DISALLOWED_TLDS: Vec<&'static str> = vec![
        ".local",
        ".arpa",
        ".invalid",
        ".localhost",
        ".internal",
        ".example",
        ".alt",
        ".onion",
    ];
    static ref ASCII_CHARS_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9.-]*$").unwrap();
    static ref TLD_START_LETTER_REGEX: Regex = Regex::new(r"^[a-zA-Z]").unwrap();
}

#[derive(Error, Debug)]
pub enum HandleError {
    #[error("HandleError: Invalid Handle {0}")]
    InvalidHandle(String),
    #[error("HandleError: Disallowed Domain {0}")]
    DisallowedDomain(String),
}

pub fn is_valid_tld<S: Into<String>>(handle: S) -> bool {
    let handle_lower = handle.into().to_lowercase();
    !DISALLOWED_TLDS
        .iter()
        .any(|domain| handle_lower.ends_with(domain))
}

// Handle constraints: a possible domain name. ASCII letters/digits/hyphens in
// each label, no leading/trailing hyphen, TLD starts with a letter, labels
// 1-63 chars, total <= 253 chars, at least two labels, case-insensitive.
pub fn ensure_valid_handle<S: Into<String>>(handle: S) -> Result<(), HandleError> {
    let handle: String = handle.into();
    if !ASCII_CHARS_REGEX.is_match(&handle) {
        return Err(HandleError::InvalidHandle(
            "Disallowed characters in handle (ASCII letters, digits, dashes, periods only)".into(),
        ));
    }
    if handle.len() > 253 {
        return Err(HandleError::InvalidHandle(
            "Handle is too long (253 chars max)".into(),
        ));
    }
    let labels: Vec<&str> = handle.split('.').collect();
    if labels.len() < 2 {
        return Err(HandleError::InvalidHandle(
            "Handle domain needs at least two parts".into(),
        ));
    }
    for (i, label) in labels.iter().enumerate() {
        if label.is_empty() {
            return Err(HandleError::InvalidHandle(
                "Handle parts can not be empty".into(),
            ));
        }
        if label.len() > 63 {
            return Err(HandleError::InvalidHandle(
                "Handle part too long (max 63 chars)".into(),
            ));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(HandleError::InvalidHandle(
                "Handle parts can not start or end with hyphens".into(),
            ));
        }
        if i == labels.len() - 1 && !TLD_START_LETTER_REGEX.is_match(label) {
            return Err(HandleError::InvalidHandle(
                "TLD must start with ASCII letter".into(),
            ));
        }
    }
    Ok(())
}

pub fn normalize_handle<S: Into<String>>(handle: S) -> String {
    handle.into().to_lowercase()
}

pub fn is_valid_handle<S: Into<String>>(handle: S) -> bool {
    ensure_valid_handle(handle).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_domains() {
        for handle in ["alice.example.com", "4chan.org", "blog.hearth.dev"] {
            assert!(is_valid_handle(handle), "{handle}");
        }
    }

    #[test]
    fn rejects_invalid() {
        for handle in ["", "alice", "-alice.com", "alice-.com", "al ice.com", "alice.0tld"] {
            assert!(!is_valid_handle(handle), "{handle:?}");
        }
    }

    #[test]
    fn disallowed_tlds() {
        assert!(!is_valid_tld("alice.local"));
        assert!(is_valid_tld("alice.com"));
    }

    #[test]
    fn normalizes_case() {
        assert_eq!(normalize_handle("Alice.Example.COM"), "alice.example.com");
    }
}
