pub mod blob;
pub mod sled_storage;

use crate::actor_store::blob::SledBlobStore;
use crate::actor_store::sled_storage::SledRepoStorage;
use anyhow::{anyhow, Result};
use hearth_common::tid::Ticker;
use hearth_crypto::Keypair;
use hearth_repo::repo::{CommitRecord, Repo};
use hearth_repo::storage::RepoStorage;
use hearth_repo::types::{
    CommitData, RecordCreateOrUpdateOp, RecordDeleteOp, RecordWriteOp, RepoRecord,
};
use hearth_repo::util::format_data_key;
use hearth_syntax::nsid::ensure_valid_nsid;
use hearth_syntax::record_key::ensure_valid_record_key;
use ipld_core::ipld::Ipld;
use lexicon_cid::Cid;
use std::sync::Arc;
use thiserror::Error;

const KEY_PRIVATE_PEM: &str = "private_pem";
const KEY_PUBLIC_PEM: &str = "public_pem";

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("InvalidSwap: commit was at {0:?}")]
    BadCommitSwap(Cid),
    #[error("InvalidSwap: record was at {0:?}")]
    BadRecordSwap(Option<Cid>),
    #[error("RecordAlreadyExists: {0}")]
    RecordAlreadyExists(String),
    #[error("RecordNotFound: {0}")]
    RecordNotFound(String),
    #[error("UnsupportedCollection: {0}")]
    UnsupportedCollection(String),
    #[error("InvalidRequest: {0}")]
    InvalidRecord(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct WriteResult {
    pub uri: String,
    pub cid: Cid,
    pub commit: CommitData,
}

pub struct FoundRecord {
    pub uri: String,
    pub cid: Cid,
    pub value: RepoRecord,
}

/// The node's one repository plus its blob store and signing key. All
/// mutations funnel through here under the server's write lock and advance
/// `(rev, root, commit)` atomically before the caller sequences the event.
pub struct ActorStore {
    pub did: String,
    pub storage: Arc<SledRepoStorage>,
    pub blob: SledBlobStore,
    keypair: Keypair,
    ticker: Ticker,
}

impl ActorStore {
    /// Opens (or initializes) the repository: loads or generates the P-256
    /// keypair and writes the genesis commit on first boot.
    pub fn open(db: &sled::Db, did: &str, max_blob_size: usize) -> Result<Self> {
        let keys = db.open_tree("keys")?;
        let keypair = match keys.get(KEY_PRIVATE_PEM)? {
            Some(pem) => Keypair::from_private_pem(&String::from_utf8_lossy(&pem))?,
            None => {
                let keypair = Keypair::generate();
                keys.insert(KEY_PRIVATE_PEM, keypair.private_pem()?.as_bytes())?;
                keys.insert(KEY_PUBLIC_PEM, keypair.public_pem()?.as_bytes())?;
                keys.flush()?;
                keypair
            }
        };
        let storage = Arc::new(SledRepoStorage::open(db)?);
        let blob = SledBlobStore::open(db, max_blob_size)?;
        let mut ticker = Ticker::new();
        if storage.get_root()?.is_none() {
            let genesis: Arc<dyn RepoStorage> = storage.clone();
            Repo::create(genesis, did, &keypair, &mut ticker)?;
            tracing::info!(did = %did, "initialized empty repository");
        }
        Ok(ActorStore {
            did: did.to_string(),
            storage,
            blob,
            keypair,
            ticker,
        })
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn next_tid(&mut self) -> String {
        self.ticker.next(None).to_string()
    }

    /// Snapshot of the current repository state.
    pub fn repo(&self) -> Result<Repo> {
        let storage: Arc<dyn RepoStorage> = self.storage.clone();
        Repo::load(storage, None)
    }

    fn validate_write(
        &self,
        collection: &str,
        rkey: &str,
        record: Option<&RepoRecord>,
    ) -> Result<(), WriteError> {
        ensure_valid_nsid(collection)
            .map_err(|e| WriteError::UnsupportedCollection(e.to_string()))?;
        ensure_valid_record_key(rkey).map_err(|e| WriteError::InvalidRecord(e.to_string()))?;
        if let Some(record) = record {
            match record.get("$type") {
                Some(Ipld::String(t)) if t == collection => Ok(()),
                Some(Ipld::String(t)) => Err(WriteError::InvalidRecord(format!(
                    "record $type `{t}` does not match collection `{collection}`"
                ))),
                _ => Err(WriteError::InvalidRecord(
                    "record must carry a string $type".to_string(),
                )),
            }
        } else {
            Ok(())
        }
    }

    fn check_swap_commit(&self, repo: &Repo, swap_commit: Option<Cid>) -> Result<(), WriteError> {
        match swap_commit {
            Some(expected) if expected != repo.cid => Err(WriteError::BadCommitSwap(repo.cid)),
            _ => Ok(()),
        }
    }

    pub fn create_record(
        &mut self,
        collection: &str,
        record: RepoRecord,
        rkey: Option<String>,
        swap_commit: Option<Cid>,
    ) -> Result<WriteResult, WriteError> {
        let rkey = match rkey {
            Some(rkey) => rkey,
            None => self.next_tid(),
        };
        self.validate_write(collection, &rkey, Some(&record))?;
        let mut repo = self.repo().map_err(WriteError::Other)?;
        self.check_swap_commit(&repo, swap_commit)?;
        if repo
            .get_record_cid(collection, &rkey)
            .map_err(WriteError::Other)?
            .is_some()
        {
            return Err(WriteError::RecordAlreadyExists(format_data_key(
                collection, &rkey,
            )));
        }
        let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
            collection: collection.to_string(),
            rkey: rkey.clone(),
            record,
        })];
        let commit = repo
            .format_commit(&writes, &self.keypair, &mut self.ticker)
            .map_err(WriteError::Other)?;
        let cid = commit.ops[0]
            .cid
            .ok_or_else(|| anyhow!("create op missing cid"))?;
        repo.apply_commit(commit.clone()).map_err(WriteError::Other)?;
        Ok(WriteResult {
            uri: format!("at://{}/{}/{}", self.did, collection, rkey),
            cid,
            commit,
        })
    }

    pub fn put_record(
        &mut self,
        collection: &str,
        rkey: &str,
        record: RepoRecord,
        swap_record: Option<Cid>,
        swap_commit: Option<Cid>,
    ) -> Result<WriteResult, WriteError> {
        self.validate_write(collection, rkey, Some(&record))?;
        let mut repo = self.repo().map_err(WriteError::Other)?;
        self.check_swap_commit(&repo, swap_commit)?;
        let current = repo
            .get_record_cid(collection, rkey)
            .map_err(WriteError::Other)?;
        if let Some(expected) = swap_record {
            if current != Some(expected) {
                return Err(WriteError::BadRecordSwap(current));
            }
        }
        let op = RecordCreateOrUpdateOp {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
            record,
        };
        let writes = vec![match current {
            Some(_) => RecordWriteOp::Update(op),
            None => RecordWriteOp::Create(op),
        }];
        let commit = repo
            .format_commit(&writes, &self.keypair, &mut self.ticker)
            .map_err(WriteError::Other)?;
        let cid = commit.ops[0]
            .cid
            .ok_or_else(|| anyhow!("write op missing cid"))?;
        repo.apply_commit(commit.clone()).map_err(WriteError::Other)?;
        Ok(WriteResult {
            uri: format!("at://{}/{}/{}", self.did, collection, rkey),
            cid,
            commit,
        })
    }

    pub fn delete_record(
        &mut self,
        collection: &str,
        rkey: &str,
        swap_record: Option<Cid>,
        swap_commit: Option<Cid>,
    ) -> Result<CommitData, WriteError> {
        self.validate_write(collection, rkey, None)?;
        let mut repo = self.repo().map_err(WriteError::Other)?;
        self.check_swap_commit(&repo, swap_commit)?;
        let current = repo
            .get_record_cid(collection, rkey)
            .map_err(WriteError::Other)?;
        let Some(current) = current else {
            return Err(WriteError::RecordNotFound(format_data_key(
                collection, rkey,
            )));
        };
        if let Some(expected) = swap_record {
            if current != expected {
                return Err(WriteError::BadRecordSwap(Some(current)));
            }
        }
        let writes = vec![RecordWriteOp::Delete(RecordDeleteOp {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })];
        let commit = repo
            .format_commit(&writes, &self.keypair, &mut self.ticker)
            .map_err(WriteError::Other)?;
        repo.apply_commit(commit.clone()).map_err(WriteError::Other)?;
        Ok(commit)
    }

    // Reads: operate on a snapshot, no write lock needed.

    pub fn get_record(
        &self,
        collection: &str,
        rkey: &str,
        expected_cid: Option<Cid>,
    ) -> Result<Option<FoundRecord>> {
        let mut repo = self.repo()?;
        let Some(cid) = repo.get_record_cid(collection, rkey)? else {
            return Ok(None);
        };
        if let Some(expected) = expected_cid {
            if cid != expected {
                return Ok(None);
            }
        }
        let Some(value) = repo.get_record(collection, rkey)? else {
            return Ok(None);
        };
        Ok(Some(FoundRecord {
            uri: format!("at://{}/{}/{}", self.did, collection, rkey),
            cid,
            value,
        }))
    }

    pub fn list_records(
        &self,
        collection: &str,
        limit: usize,
        cursor: Option<&str>,
        reverse: bool,
    ) -> Result<Vec<CommitRecord>> {
        self.repo()?.list_records(collection, limit, cursor, reverse)
    }

    pub fn collections(&self) -> Result<Vec<String>> {
        self.repo()?.collections()
    }

    pub fn export_car(&self, since: Option<&str>) -> Result<Vec<u8>> {
        self.repo()?.export_car(since)
    }
}
