use hearth_common::env::{env_int, env_list, env_str};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// External origin, e.g. `https://pds.example.com`.
    pub public_url: String,
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Clone)]
pub struct FirehoseConfig {
    pub queue_capacity: usize,
    pub send_deadline_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub period_secs: u64,
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub collections: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub max_blob_size: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub firehose: FirehoseConfig,
    pub poller: PollerConfig,
    pub blob: BlobConfig,
    /// Bearer credential expected on write procedures. Verification beyond
    /// equality is the embedder's concern; `None` leaves writes open.
    pub access_token: Option<String>,
    pub data_dir: PathBuf,
}

pub const DEFAULT_POLL_COLLECTIONS: [&str; 4] = [
    "app.bsky.feed.post",
    "app.bsky.feed.like",
    "app.bsky.feed.repost",
    "app.bsky.graph.follow",
];

pub fn env_to_cfg() -> ServerConfig {
    let hostname = env_str("HEARTH_HOSTNAME").unwrap_or_else(|| "localhost".to_string());
    let port = env_int("HEARTH_PORT").unwrap_or(3000) as u16;
    let public_url = env_str("HEARTH_PUBLIC_URL")
        .unwrap_or_else(|| format!("https://{hostname}"));
    let did = env_str("HEARTH_DID")
        .unwrap_or_else(|| crate::identity::did_for_web_host(&hostname, port));
    let handle = env_str("HEARTH_HANDLE").unwrap_or_else(|| hostname.clone());

    ServerConfig {
        service: ServiceConfig {
            hostname,
            port,
            public_url,
            did,
            handle,
        },
        firehose: FirehoseConfig {
            queue_capacity: env_int("HEARTH_FIREHOSE_CAPACITY").unwrap_or(1000),
            send_deadline_ms: env_int("HEARTH_FIREHOSE_SEND_DEADLINE_MS").unwrap_or(5000) as u64,
        },
        poller: PollerConfig {
            period_secs: env_int("HEARTH_POLL_PERIOD_SECS").unwrap_or(3600) as u64,
            workers: env_int("HEARTH_POLL_WORKERS").unwrap_or(4),
            request_timeout_secs: env_int("HEARTH_REQUEST_TIMEOUT_SECS").unwrap_or(30) as u64,
            collections: match env_list("HEARTH_POLL_COLLECTIONS") {
                list if list.is_empty() => DEFAULT_POLL_COLLECTIONS
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                list => list,
            },
        },
        blob: BlobConfig {
            max_blob_size: env_int("HEARTH_MAX_BLOB_SIZE").unwrap_or(1_000_000),
        },
        access_token: env_str("HEARTH_ACCESS_TOKEN"),
        data_dir: PathBuf::from(
            env_str("HEARTH_DATA_DIR").unwrap_or_else(|| "./data".to_string()),
        ),
    }
}
