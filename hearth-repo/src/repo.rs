use crate::block_map::BlockMap;
use crate::car;
use crate::cbor;
use crate::cid::cid_for_cbor_bytes;
use crate::cid_set::CidSet;
use crate::data_diff::DataDiff;
use crate::mst::Mst;
use crate::storage::RepoStorage;
use crate::types::{
    CidAndBytes, Commit, CommitData, CommitOp, RecordPath, RecordWriteOp, RepoRecord,
    UnsignedCommit, WriteOpAction,
};
use crate::util::{format_data_key, parse_data_key, sign_commit};
use anyhow::{anyhow, bail, Result};
use hearth_common::tid::{Ticker, Tid};
use hearth_crypto::Keypair;
use lexicon_cid::Cid;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

const REPO_VERSION: u8 = 3;

pub struct CommitRecord {
    pub collection: String,
    pub rkey: String,
    pub cid: Cid,
    pub record: RepoRecord,
}

/// One repository: the current signed commit plus the MST it points at.
pub struct Repo {
    pub storage: Arc<dyn RepoStorage>,
    pub data: Mst,
    pub commit: Commit,
    pub cid: Cid,
}

impl Repo {
    pub fn new(storage: Arc<dyn RepoStorage>, data: Mst, commit: Commit, cid: Cid) -> Self {
        Repo {
            storage,
            data,
            commit,
            cid,
        }
    }

    pub fn load(storage: Arc<dyn RepoStorage>, cid: Option<Cid>) -> Result<Self> {
        let commit_cid = match cid {
            Some(cid) => Some(cid),
            None => storage.get_root()?,
        };
        let Some(commit_cid) = commit_cid else {
            bail!("No cid provided and none in storage");
        };
        let commit_bytes = storage
            .get_bytes(&commit_cid)?
            .ok_or_else(|| anyhow!("Missing blocks for commit cid {commit_cid}"))?;
        let commit: Commit = cbor::cbor_to_struct(&commit_bytes)?;
        let data = Mst::load(storage.clone(), commit.data, None);
        Ok(Repo::new(storage, data, commit, commit_cid))
    }

    pub fn did(&self) -> &str {
        &self.commit.did
    }

    pub fn rev(&self) -> &str {
        &self.commit.rev
    }

    pub fn version(&self) -> u8 {
        self.commit.version
    }

    pub fn get_record(&mut self, collection: &str, rkey: &str) -> Result<Option<RepoRecord>> {
        let data_key = format_data_key(collection, rkey);
        match self.data.get(&data_key)? {
            None => Ok(None),
            Some(cid) => Ok(Some(self.storage.read_record(&cid)?)),
        }
    }

    pub fn get_record_cid(&mut self, collection: &str, rkey: &str) -> Result<Option<Cid>> {
        self.data.get(&format_data_key(collection, rkey))
    }

    /// Records of one collection in key order. `cursor` is the rkey the
    /// previous page ended on.
    pub fn list_records(
        &mut self,
        collection: &str,
        limit: usize,
        cursor: Option<&str>,
        reverse: bool,
    ) -> Result<Vec<CommitRecord>> {
        let prefix = format!("{collection}/");
        let mut leaves = self.data.list_with_prefix(&prefix, None)?;
        if reverse {
            leaves.reverse();
        }
        let mut out: Vec<CommitRecord> = Vec::new();
        for leaf in leaves {
            let RecordPath { collection, rkey } = parse_data_key(&leaf.key)?;
            if let Some(cursor) = cursor {
                let passed = if reverse {
                    rkey.as_str() >= cursor
                } else {
                    rkey.as_str() <= cursor
                };
                if passed {
                    continue;
                }
            }
            out.push(CommitRecord {
                collection,
                rkey,
                cid: leaf.value,
                record: self.storage.read_record(&leaf.value)?,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub fn collections(&mut self) -> Result<Vec<String>> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for leaf in self.data.leaves()? {
            seen.insert(parse_data_key(&leaf.key)?.collection);
        }
        Ok(seen.into_iter().collect())
    }

    // Commit construction

    pub fn format_init_commit(
        storage: Arc<dyn RepoStorage>,
        did: &str,
        keypair: &Keypair,
        ticker: &mut Ticker,
    ) -> Result<CommitData> {
        let mut new_blocks = BlockMap::new();
        let mut data = Mst::create(storage, None, None)?;
        let data_cid = data.get_pointer()?;
        let mut diff = DataDiff::of(&mut data, None)?;
        new_blocks.add_map(std::mem::take(&mut diff.new_mst_blocks));
        let rev = ticker.next(None);
        let commit = sign_commit(
            UnsignedCommit {
                did: did.to_string(),
                version: REPO_VERSION,
                data: data_cid,
                rev: rev.to_string(),
                prev: None,
            },
            keypair,
        )?;
        let commit_cid = new_blocks.add(&commit)?;
        Ok(CommitData {
            cid: commit_cid,
            rev: rev.to_string(),
            since: None,
            prev: None,
            new_blocks: new_blocks.clone(),
            relevant_blocks: new_blocks,
            removed_cids: diff.removed_cids,
            ops: vec![],
        })
    }

    pub fn create_from_commit(storage: Arc<dyn RepoStorage>, commit: CommitData) -> Result<Self> {
        let commit_cid = commit.cid;
        storage.apply_commit(commit)?;
        Repo::load(storage, Some(commit_cid))
    }

    pub fn create(
        storage: Arc<dyn RepoStorage>,
        did: &str,
        keypair: &Keypair,
        ticker: &mut Ticker,
    ) -> Result<Self> {
        let commit = Self::format_init_commit(storage.clone(), did, keypair, ticker)?;
        Self::create_from_commit(storage, commit)
    }

    /// Applies the writes to a copy of the tree, signs the resulting root
    /// and assembles everything a commit changes. Nothing is persisted yet.
    pub fn format_commit(
        &mut self,
        writes: &[RecordWriteOp],
        keypair: &Keypair,
        ticker: &mut Ticker,
    ) -> Result<CommitData> {
        let mut leaves = BlockMap::new();
        let mut data = self.data.clone();
        let mut ops: Vec<CommitOp> = Vec::new();

        for write in writes {
            match write {
                RecordWriteOp::Create(write) => {
                    let cid = leaves.add(&write.record)?;
                    let data_key = format_data_key(&write.collection, &write.rkey);
                    data = data.add(&data_key, cid, None)?;
                    ops.push(CommitOp {
                        action: WriteOpAction::Create,
                        path: data_key,
                        cid: Some(cid),
                    });
                }
                RecordWriteOp::Update(write) => {
                    let cid = leaves.add(&write.record)?;
                    let data_key = format_data_key(&write.collection, &write.rkey);
                    data = data.update(&data_key, cid)?;
                    ops.push(CommitOp {
                        action: WriteOpAction::Update,
                        path: data_key,
                        cid: Some(cid),
                    });
                }
                RecordWriteOp::Delete(write) => {
                    let data_key = format_data_key(&write.collection, &write.rkey);
                    data = data.delete(&data_key)?;
                    ops.push(CommitOp {
                        action: WriteOpAction::Delete,
                        path: data_key,
                        cid: None,
                    });
                }
            }
        }

        let data_cid = data.get_pointer()?;
        let diff = DataDiff::of(&mut data, Some(&mut self.data.clone()))?;

        let mut new_blocks = diff.new_mst_blocks;
        let mut removed_cids = diff.removed_cids;

        let mut relevant_blocks = BlockMap::new();
        for op in writes {
            data.add_blocks_for_path(
                &format_data_key(op.collection(), op.rkey()),
                &mut relevant_blocks,
            )?;
        }

        let added_leaves = leaves.get_many(diff.new_leaf_cids.to_list());
        if !added_leaves.missing.is_empty() {
            bail!("Missing leaf blocks: {:?}", added_leaves.missing);
        }
        new_blocks.add_map(added_leaves.blocks.clone());
        relevant_blocks.add_map(added_leaves.blocks);

        let prev_rev = Tid::from_str(self.rev())?;
        let rev = ticker.next(Some(&prev_rev));

        let commit = sign_commit(
            UnsignedCommit {
                did: self.did().to_string(),
                version: REPO_VERSION,
                data: data_cid,
                rev: rev.to_string(),
                prev: Some(self.cid),
            },
            keypair,
        )?;
        let commit_bytes = cbor::struct_to_cbor(&commit)?;
        let commit_cid = cid_for_cbor_bytes(&commit_bytes)?;

        if commit_cid != self.cid {
            new_blocks.set(commit_cid, commit_bytes.clone());
            relevant_blocks.set(commit_cid, commit_bytes);
            removed_cids.add(self.cid);
        }

        Ok(CommitData {
            cid: commit_cid,
            rev: rev.to_string(),
            since: Some(self.rev().to_string()),
            prev: Some(self.cid),
            new_blocks,
            relevant_blocks,
            removed_cids,
            ops,
        })
    }

    pub fn apply_commit(&self, commit_data: CommitData) -> Result<Self> {
        let commit_cid = commit_data.cid;
        self.storage.apply_commit(commit_data)?;
        Repo::load(self.storage.clone(), Some(commit_cid))
    }

    pub fn apply_writes(
        &mut self,
        writes: &[RecordWriteOp],
        keypair: &Keypair,
        ticker: &mut Ticker,
    ) -> Result<Self> {
        let commit = self.format_commit(writes, keypair, ticker)?;
        self.apply_commit(commit)
    }

    // Sync

    /// Whole-repo export: commit block, then MST nodes reachable from it,
    /// then the record blocks the leaves point at. With `since`, only the
    /// delta against the commit carrying that rev.
    pub fn export_car(&mut self, since: Option<&str>) -> Result<Vec<u8>> {
        let mut blocks: Vec<CidAndBytes> = Vec::new();
        let commit_bytes = self
            .storage
            .get_bytes(&self.cid)?
            .ok_or_else(|| anyhow!("Missing commit block {0}", self.cid))?;
        blocks.push(CidAndBytes {
            cid: self.cid,
            bytes: commit_bytes,
        });

        let (nodes, leaf_cids) = match since.and_then(|rev| self.find_root_by_rev(rev)) {
            Some(mut old_root) => {
                let diff = DataDiff::of(&mut self.data.clone(), Some(&mut old_root))?;
                let mut leaf_cids = CidSet::new(None);
                for add in diff.add_list() {
                    leaf_cids.add(add.cid);
                }
                for update in diff.update_list() {
                    leaf_cids.add(update.cid);
                }
                (diff.new_mst_blocks, leaf_cids)
            }
            None => {
                let mut nodes = BlockMap::new();
                let mut leaf_cids = CidSet::new(None);
                self.data.collect_blocks(&mut nodes, &mut leaf_cids)?;
                (nodes, leaf_cids)
            }
        };

        for entry in nodes.entries() {
            blocks.push(entry);
        }
        let found = self.storage.get_blocks(leaf_cids.to_list())?;
        if !found.missing.is_empty() {
            bail!("Missing record blocks: {:?}", found.missing);
        }
        for entry in found.blocks.entries() {
            blocks.push(entry);
        }
        car::blocks_to_car(Some(&self.cid), blocks)
    }

    /// Walks the prev chain for the commit whose rev equals `rev` and
    /// returns its tree root. Commits fall out of the ring eventually, so a
    /// miss just means a full export.
    fn find_root_by_rev(&self, rev: &str) -> Option<Mst> {
        let mut cursor = Some(self.cid);
        while let Some(cid) = cursor {
            let bytes = self.storage.get_bytes(&cid).ok()??;
            let commit: Commit = cbor::cbor_to_struct(&bytes).ok()?;
            if commit.rev == rev {
                return Some(Mst::load(self.storage.clone(), commit.data, None));
            }
            cursor = commit.prev;
        }
        None
    }
}
