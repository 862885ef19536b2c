use crate::block_map::BlockMap;
use crate::cid_set::CidSet;
use ipld_core::ipld::Ipld;
use lexicon_cid::Cid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A record as the engine sees it: an opaque `$type`-discriminated map.
pub type RepoRecord = BTreeMap<String, Ipld>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedCommit {
    pub did: String,
    pub version: u8, // 3
    pub data: Cid,
    pub rev: String,
    pub prev: Option<Cid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub did: String,
    pub version: u8, // 3
    pub data: Cid,
    pub rev: String,
    pub prev: Option<Cid>,
    #[serde(with = "serde_bytes")]
    pub sig: Vec<u8>,
}

impl Commit {
    pub fn unsigned(&self) -> UnsignedCommit {
        UnsignedCommit {
            did: self.did.clone(),
            version: self.version,
            data: self.data,
            rev: self.rev.clone(),
            prev: self.prev,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CidAndBytes {
    pub cid: Cid,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPath {
    pub collection: String,
    pub rkey: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOpAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for WriteOpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOpAction::Create => write!(f, "create"),
            WriteOpAction::Update => write!(f, "update"),
            WriteOpAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordCreateOrUpdateOp {
    pub collection: String,
    pub rkey: String,
    pub record: RepoRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDeleteOp {
    pub collection: String,
    pub rkey: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordWriteOp {
    Create(RecordCreateOrUpdateOp),
    Update(RecordCreateOrUpdateOp),
    Delete(RecordDeleteOp),
}

impl RecordWriteOp {
    pub fn collection(&self) -> &str {
        match self {
            RecordWriteOp::Create(op) | RecordWriteOp::Update(op) => &op.collection,
            RecordWriteOp::Delete(op) => &op.collection,
        }
    }

    pub fn rkey(&self) -> &str {
        match self {
            RecordWriteOp::Create(op) | RecordWriteOp::Update(op) => &op.rkey,
            RecordWriteOp::Delete(op) => &op.rkey,
        }
    }
}

/// One firehose-visible operation of a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOp {
    pub action: WriteOpAction,
    pub path: String,
    pub cid: Option<Cid>,
}

/// Everything a persisted commit changes, ready for storage and the
/// sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitData {
    pub cid: Cid,
    pub rev: String,
    pub since: Option<String>,
    pub prev: Option<Cid>,
    pub new_blocks: BlockMap,
    pub relevant_blocks: BlockMap,
    pub removed_cids: CidSet,
    pub ops: Vec<CommitOp>,
}
