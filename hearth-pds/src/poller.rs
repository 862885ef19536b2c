//! Outbound subscription poller: on a timer, pull records from every
//! subscribed DID's PDS and feed them through the dispatcher. One slow or
//! broken peer never blocks the rest.

use crate::config::PollerConfig;
use crate::content::Author;
use crate::dispatcher::Dispatcher;
use crate::identity::{get_handle, get_pds_endpoint, resolve_did_web};
use crate::APP_USER_AGENT;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub did: String,
    #[serde(rename = "subscribedAt")]
    pub subscribed_at: String,
    #[serde(rename = "lastSync")]
    pub last_sync: Option<String>,
}

/// DIDs this node follows, keyed by DID.
pub struct SubscriptionStore {
    tree: sled::Tree,
}

impl SubscriptionStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(SubscriptionStore {
            tree: db.open_tree("subscriptions")?,
        })
    }

    pub fn add(&self, did: &str) -> Result<bool> {
        if self.tree.contains_key(did.as_bytes())? {
            return Ok(false);
        }
        let sub = Subscription {
            did: did.to_string(),
            subscribed_at: hearth_common::now(),
            last_sync: None,
        };
        self.tree
            .insert(did.as_bytes(), serde_json::to_vec(&sub)?)?;
        Ok(true)
    }

    pub fn remove(&self, did: &str) -> Result<bool> {
        Ok(self.tree.remove(did.as_bytes())?.is_some())
    }

    pub fn list(&self) -> Result<Vec<Subscription>> {
        self.tree
            .iter()
            .map(|item| {
                let (_, bytes) = item?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    pub fn mark_synced(&self, did: &str) -> Result<()> {
        if let Some(bytes) = self.tree.get(did.as_bytes())? {
            let mut sub: Subscription = serde_json::from_slice(&bytes)?;
            sub.last_sync = Some(hearth_common::now());
            self.tree
                .insert(did.as_bytes(), serde_json::to_vec(&sub)?)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ListedRecord {
    uri: String,
    #[allow(dead_code)]
    cid: String,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ListRecordsPage {
    records: Vec<ListedRecord>,
    cursor: Option<String>,
}

pub struct RelayPoller {
    cfg: PollerConfig,
    subscriptions: Arc<SubscriptionStore>,
    dispatcher: Arc<Dispatcher>,
    client: reqwest::Client,
}

impl RelayPoller {
    pub fn new(
        cfg: PollerConfig,
        subscriptions: Arc<SubscriptionStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;
        Ok(RelayPoller {
            cfg,
            subscriptions,
            dispatcher,
            client,
        })
    }

    /// Runs forever; call from a spawned task.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.cfg.period_secs));
        loop {
            interval.tick().await;
            self.clone().tick().await;
        }
    }

    /// One polling round across every subscription.
    pub async fn tick(self: Arc<Self>) {
        let subs = match self.subscriptions.list() {
            Ok(subs) => subs,
            Err(err) => {
                tracing::error!("could not list subscriptions: {err}");
                return;
            }
        };
        let semaphore = Arc::new(Semaphore::new(self.cfg.workers.max(1)));
        let mut handles = Vec::new();
        for sub in subs {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let poller = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match poller.sync_did(&sub.did).await {
                    Ok(count) => {
                        tracing::debug!(did = %sub.did, count, "subscription synced");
                        if let Err(err) = poller.subscriptions.mark_synced(&sub.did) {
                            tracing::warn!(did = %sub.did, "could not update last_sync: {err}");
                        }
                    }
                    // one failing DID never affects the others
                    Err(err) => tracing::warn!(did = %sub.did, "subscription sync failed: {err}"),
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn sync_did(&self, did: &str) -> Result<usize> {
        let doc = resolve_did_web(&self.client, did).await?;
        let endpoint =
            get_pds_endpoint(&doc).ok_or_else(|| anyhow!("no PDS endpoint in DID document"))?;
        let author = Author {
            did: did.to_string(),
            handle: get_handle(&doc).unwrap_or_else(|| did.to_string()),
        };
        let mut dispatched = 0;
        for collection in &self.cfg.collections {
            dispatched += self
                .sync_collection(&endpoint, did, collection, &author)
                .await?;
        }
        Ok(dispatched)
    }

    async fn sync_collection(
        &self,
        endpoint: &str,
        did: &str,
        collection: &str,
        author: &Author,
    ) -> Result<usize> {
        let mut dispatched = 0;
        let mut cursor: Option<String> = None;
        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("repo", did.to_string()),
                ("collection", collection.to_string()),
                ("limit", "100".to_string()),
            ];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }
            let page: ListRecordsPage = self
                .client
                .get(format!("{endpoint}/xrpc/com.atproto.repo.listRecords"))
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if page.records.is_empty() {
                break;
            }
            for record in &page.records {
                match self
                    .dispatcher
                    .dispatch(&record.value, author, Some(&record.uri))
                {
                    Ok(outcome) => {
                        tracing::trace!(uri = %record.uri, ?outcome, "dispatched remote record");
                        dispatched += 1;
                    }
                    Err(err) => tracing::warn!(uri = %record.uri, "dispatch failed: {err}"),
                }
            }
            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(dispatched)
    }
}
