use crate::nsid::ensure_valid_nsid;
use crate::record_key::ensure_valid_record_key;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("InvalidAtUriError: {0}")]
pub struct InvalidAtUriError(String);

/// An `at://` URI in the strict three-segment form
/// `at://<did>/<collection>/<rkey>`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AtUri {
    host: String,
    collection: String,
    rkey: String,
}

impl AtUri {
    pub fn new(uri: &str) -> Result<Self, InvalidAtUriError> {
        let rest = uri
            .strip_prefix("at://")
            .ok_or_else(|| InvalidAtUriError(format!("missing at:// prefix: `{uri}`")))?;
        let mut segments = rest.split('/');
        let host = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InvalidAtUriError(format!("missing authority: `{uri}`")))?;
        let collection = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InvalidAtUriError(format!("missing collection: `{uri}`")))?;
        let rkey = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InvalidAtUriError(format!("missing rkey: `{uri}`")))?;
        if segments.next().is_some() {
            return Err(InvalidAtUriError(format!(
                "expected exactly three path segments: `{uri}`"
            )));
        }
        if !host.starts_with("did:") {
            return Err(InvalidAtUriError(format!("authority must be a DID: `{uri}`")));
        }
        ensure_valid_nsid(collection).map_err(|e| InvalidAtUriError(e.to_string()))?;
        ensure_valid_record_key(rkey).map_err(|e| InvalidAtUriError(e.to_string()))?;
        Ok(AtUri {
            host: host.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }

    pub fn make(did: &str, collection: &str, rkey: &str) -> Result<Self, InvalidAtUriError> {
        AtUri::new(&format!("at://{did}/{collection}/{rkey}"))
    }

    pub fn get_hostname(&self) -> &str {
        &self.host
    }

    pub fn get_collection(&self) -> &str {
        &self.collection
    }

    pub fn get_rkey(&self) -> &str {
        &self.rkey
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.host, self.collection, self.rkey)
    }
}

impl TryFrom<&str> for AtUri {
    type Error = InvalidAtUriError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        AtUri::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_segments() {
        let uri = AtUri::new("at://did:web:example.com/app.bsky.feed.post/3jui7kd54zh2y").unwrap();
        assert_eq!(uri.get_hostname(), "did:web:example.com");
        assert_eq!(uri.get_collection(), "app.bsky.feed.post");
        assert_eq!(uri.get_rkey(), "3jui7kd54zh2y");
        assert_eq!(
            uri.to_string(),
            "at://did:web:example.com/app.bsky.feed.post/3jui7kd54zh2y"
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!(AtUri::new("https://example.com").is_err());
        assert!(AtUri::new("at://did:web:example.com").is_err());
        assert!(AtUri::new("at://did:web:example.com/app.bsky.feed.post").is_err());
        assert!(AtUri::new("at://did:web:example.com/app.bsky.feed.post/rkey/extra").is_err());
        assert!(AtUri::new("at://example.com/app.bsky.feed.post/rkey").is_err());
        assert!(AtUri::new("at://did:web:example.com/notannsid/rkey").is_err());
    }
}
