use crate::xrpc::stream::message_frame;
use anyhow::Result;
use hearth_repo::car::blocks_to_car;
use hearth_repo::types::{CommitData, CommitOp};
use lexicon_cid::Cid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEvt {
    pub seq: i64,
    pub repo: String,
    pub commit: Cid,
    pub rev: String,
    pub since: Option<String>,
    /// CAR slice carrying the commit block and the blocks relevant to the
    /// written paths.
    #[serde(with = "serde_bytes")]
    pub blocks: Vec<u8>,
    pub ops: Vec<CommitOp>,
    pub blobs: Vec<Cid>,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityEvt {
    pub seq: i64,
    pub did: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEvt {
    pub seq: i64,
    pub did: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeqEvt {
    Commit(CommitEvt),
    Identity(IdentityEvt),
    Account(AccountEvt),
}

impl SeqEvt {
    pub fn seq(&self) -> i64 {
        match self {
            SeqEvt::Commit(evt) => evt.seq,
            SeqEvt::Identity(evt) => evt.seq,
            SeqEvt::Account(evt) => evt.seq,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SeqEvt::Commit(_) => "#commit",
            SeqEvt::Identity(_) => "#identity",
            SeqEvt::Account(_) => "#account",
        }
    }

    /// Wire frame: `varint(header_len) || header || body`.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        match self {
            SeqEvt::Commit(evt) => message_frame(self.event_type(), evt),
            SeqEvt::Identity(evt) => message_frame(self.event_type(), evt),
            SeqEvt::Account(evt) => message_frame(self.event_type(), evt),
        }
    }
}

pub fn format_seq_commit(did: &str, seq: i64, commit_data: &CommitData) -> Result<CommitEvt> {
    let car_slice = blocks_to_car(
        Some(&commit_data.cid),
        commit_data.relevant_blocks.entries(),
    )?;
    Ok(CommitEvt {
        seq,
        repo: did.to_string(),
        commit: commit_data.cid,
        rev: commit_data.rev.clone(),
        since: commit_data.since.clone(),
        blocks: car_slice,
        ops: commit_data.ops.clone(),
        blobs: Vec::new(),
        time: hearth_common::now(),
    })
}

pub fn format_seq_identity_evt(did: &str, seq: i64, handle: Option<String>) -> IdentityEvt {
    IdentityEvt {
        seq,
        did: did.to_string(),
        handle,
        time: hearth_common::now(),
    }
}

pub fn format_seq_account_evt(did: &str, seq: i64, active: bool, status: Option<String>) -> AccountEvt {
    AccountEvt {
        seq,
        did: did.to_string(),
        active,
        status,
        time: hearth_common::now(),
    }
}
