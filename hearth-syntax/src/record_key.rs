use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref RKEY_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_~.:-]{1,512}$").unwrap();
}

#[derive(Error, Debug)]
#[error("InvalidRecordKeyError: {0}")]
pub struct InvalidRecordKeyError(String);

// Record keys are case-sensitive, 1-512 chars from [A-Za-z0-9._:~-],
// excluding the exact values "." and "..".
pub fn ensure_valid_record_key<S: Into<String>>(rkey: S) -> Result<(), InvalidRecordKeyError> {
    let rkey: String = rkey.into();
    if rkey == "." || rkey == ".." {
        return Err(InvalidRecordKeyError(
            "record key can not be \".\" or \"..\"".into(),
        ));
    }
    if !RKEY_REGEX.is_match(&rkey) {
        return Err(InvalidRecordKeyError(
            "record key syntax not valid (regex)".into(),
        ));
    }
    Ok(())
}

pub fn is_valid_record_key<S: Into<String>>(rkey: S) -> bool {
    ensure_valid_record_key(rkey).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_tids_and_self() {
        for rkey in ["3jui7kd54zh2y", "self", "pre:fix", "~1.2-3_"] {
            assert!(is_valid_record_key(rkey), "{rkey}");
        }
    }

    #[test]
    fn rejects_invalid() {
        for rkey in ["", ".", "..", "has space", "has/slash", "has!bang"] {
            assert!(!is_valid_record_key(rkey), "{rkey:?}");
        }
    }
}
