use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref ASCII_CHARS_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9.-]*$").unwrap();
}

#[derive(Error, Debug)]
#[error("InvalidNsidError: {0}")]
pub struct InvalidNsidError(String);

// Human readable constraints on NSID:
// - a valid domain in reversed notation
// - followed by an additional period-separated name, which is alphanumeric and starts with a letter
pub fn ensure_valid_nsid<S: Into<String>>(nsid: S) -> Result<(), InvalidNsidError> {
    let nsid: String = nsid.into();
    if !ASCII_CHARS_REGEX.is_match(&nsid) {
        return Err(InvalidNsidError(
            "Disallowed characters in NSID (ASCII letters, digits, dashes, periods only)".into(),
        ));
    }

    if nsid.len() > 253 + 1 + 63 {
        return Err(InvalidNsidError("NSID is too long (317 chars max)".into()));
    }

    let labels: Vec<&str> = nsid.split('.').collect();
    if labels.len() < 3 {
        return Err(InvalidNsidError("NSID needs at least three parts".into()));
    }

    for (i, label) in labels.iter().enumerate() {
        if label.is_empty() {
            return Err(InvalidNsidError("NSID parts can not be empty".into()));
        }
        if label.len() > 63 {
            return Err(InvalidNsidError("NSID part too long (max 63 chars)".into()));
        }

        let is_last_segment = i == labels.len() - 1;
        if !is_last_segment {
            if label.starts_with('-') || label.ends_with('-') {
                return Err(InvalidNsidError(
                    "NSID authority parts can not start or end with hyphen".into(),
                ));
            }
            if i == 0 && label.starts_with(char::is_numeric) {
                return Err(InvalidNsidError(
                    "NSID first part may not start with a digit".into(),
                ));
            }
        } else {
            if label.contains('-') {
                return Err(InvalidNsidError(
                    "NSID name part may not contain hyphens".into(),
                ));
            }
            if !label.starts_with(char::is_alphabetic) {
                return Err(InvalidNsidError(
                    "NSID name part must start with a letter".into(),
                ));
            }
        }
    }

    Ok(())
}

pub fn is_valid_nsid<S: Into<String>>(nsid: S) -> bool {
    ensure_valid_nsid(nsid).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_collections() {
        for nsid in [
            "app.bsky.feed.post",
            "app.bsky.feed.like",
            "app.bsky.graph.follow",
            "app.bsky.actor.profile",
            "com.example.fooBar",
        ] {
            assert!(is_valid_nsid(nsid), "{nsid}");
        }
    }

    #[test]
    fn rejects_invalid() {
        for nsid in [
            "",
            "com.example",
            "com.example.3numberstart",
            "com.exa💩mple.thing",
            "com.example.foo-bar",
            "3com.example.thing",
            "com.-example.thing",
        ] {
            assert!(!is_valid_nsid(nsid), "{nsid}");
        }
    }
}
