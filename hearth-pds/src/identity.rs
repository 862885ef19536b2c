use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use url::Url;

/// did:web for a host, port folded in as `%3A<port>` when non-standard.
pub fn did_for_web_host(hostname: &str, port: u16) -> String {
    if port == 443 || port == 80 {
        format!("did:web:{hostname}")
    } else {
        format!("did:web:{hostname}%3A{port}")
    }
}

/// Resolution URL for a did:web, per the method spec: colons become path
/// segments, `%3A` decodes back into a port.
pub fn did_web_to_url(did: &str) -> Result<String> {
    let rest = did
        .strip_prefix("did:web:")
        .ok_or_else(|| anyhow!("not a did:web: {did}"))?;
    if rest.is_empty() {
        return Err(anyhow!("empty did:web: {did}"));
    }
    let mut segments = rest.split(':');
    let host = segments
        .next()
        .ok_or_else(|| anyhow!("empty did:web: {did}"))?
        .replace("%3A", ":")
        .replace("%3a", ":");
    let path: Vec<&str> = segments.collect();
    if path.is_empty() {
        Ok(format!("https://{host}/.well-known/did.json"))
    } else {
        Ok(format!("https://{host}/{}/did.json", path.join("/")))
    }
}

/// The DID document served at `/.well-known/did.json`.
pub fn build_did_doc(did: &str, handle: &str, origin: &str, public_key_multibase: &str) -> Value {
    json!({
        "@context": [
            "https://www.w3.org/ns/did/v1",
            "https://w3id.org/security/multikey/v1"
        ],
        "id": did,
        "alsoKnownAs": [format!("at://{handle}")],
        "verificationMethod": [{
            "id": format!("{did}#atproto"),
            "type": "Multikey",
            "controller": did,
            "publicKeyMultibase": public_key_multibase,
        }],
        "service": [{
            "id": "#atproto_pds",
            "type": "AtprotoPersonalDataServer",
            "serviceEndpoint": origin,
        }]
    })
}

pub fn get_handle(doc: &Value) -> Option<String> {
    doc.get("alsoKnownAs")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .find(|name| name.starts_with("at://"))
        .map(|found| found[5..].to_string())
}

/// PDS endpoint out of a DID document's service list.
pub fn get_pds_endpoint(doc: &Value) -> Option<String> {
    let did = doc.get("id")?.as_str()?;
    let services = doc.get("service")?.as_array()?;
    let found = services.iter().find(|service| {
        let id = service.get("id").and_then(|v| v.as_str()).unwrap_or("");
        id == "#atproto_pds" || id == format!("{did}#atproto_pds")
    })?;
    if found.get("type")?.as_str()? != "AtprotoPersonalDataServer" {
        return None;
    }
    validate_url(found.get("serviceEndpoint")?.as_str()?)
}

// Check protocol and hostname to prevent potential SSRF
pub fn validate_url(url_str: &str) -> Option<String> {
    match Url::parse(url_str) {
        Err(_) => None,
        Ok(url) => {
            if !["http", "https"].contains(&url.scheme()) || url.host().is_none() {
                None
            } else {
                Some(url_str.to_string())
            }
        }
    }
}

/// Fetches and parses a remote did:web document.
pub async fn resolve_did_web(client: &reqwest::Client, did: &str) -> Result<Value> {
    let url = did_web_to_url(did)?;
    let doc: Value = client.get(&url).send().await?.json().await?;
    match doc.get("id").and_then(|v| v.as_str()) {
        Some(id) if id == did => Ok(doc),
        Some(id) => Err(anyhow!("DID document id mismatch: expected {did}, got {id}")),
        None => Err(anyhow!("DID document missing id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_for_host_folds_port() {
        assert_eq!(did_for_web_host("pds.example.com", 443), "did:web:pds.example.com");
        assert_eq!(
            did_for_web_host("localhost", 3000),
            "did:web:localhost%3A3000"
        );
    }

    #[test]
    fn did_web_url_round_trip() {
        assert_eq!(
            did_web_to_url("did:web:pds.example.com").unwrap(),
            "https://pds.example.com/.well-known/did.json"
        );
        assert_eq!(
            did_web_to_url("did:web:localhost%3A3000").unwrap(),
            "https://localhost:3000/.well-known/did.json"
        );
        assert_eq!(
            did_web_to_url("did:web:example.com:users:alice").unwrap(),
            "https://example.com/users/alice/did.json"
        );
        assert!(did_web_to_url("did:plc:abc123").is_err());
    }

    #[test]
    fn did_doc_shape() {
        let doc = build_did_doc(
            "did:web:pds.example.com",
            "pds.example.com",
            "https://pds.example.com",
            "zQ3shunexample",
        );
        assert_eq!(doc["id"], "did:web:pds.example.com");
        assert_eq!(doc["alsoKnownAs"][0], "at://pds.example.com");
        assert_eq!(doc["verificationMethod"][0]["type"], "Multikey");
        assert_eq!(get_handle(&doc).unwrap(), "pds.example.com");
        assert_eq!(
            get_pds_endpoint(&doc).unwrap(),
            "https://pds.example.com"
        );
    }

    #[test]
    fn url_validation_blocks_non_http() {
        assert!(validate_url("ftp://example.com").is_none());
        assert!(validate_url("not a url").is_none());
        assert!(validate_url("https://example.com").is_some());
    }
}
