use anyhow::{anyhow, Result};
use hearth_repo::block_map::{BlockMap, BlocksAndMissing};
use hearth_repo::storage::{ReadableBlockstore, RepoStorage};
use hearth_repo::types::{CommitData, WriteOpAction};
use lexicon_cid::Cid;

const STATE_ROOT: &str = "root";
const STATE_REV: &str = "rev";

/// How many commits the ring keeps before the oldest are dropped.
const COMMIT_RING_MIN: usize = 100;

/// sled-backed repository storage. Tree layout:
/// - `blocks`: cid bytes → block bytes (records and MST nodes)
/// - `records`: `<collection>/<rkey>` → record cid bytes (denormalized index)
/// - `commits`: cid bytes → commit block bytes (ring, ≥100 entries)
/// - `commit_log`: big-endian counter → commit cid bytes (ring order)
/// - `state`: root/rev pointers
#[derive(Debug)]
pub struct SledRepoStorage {
    blocks: sled::Tree,
    records: sled::Tree,
    commits: sled::Tree,
    commit_log: sled::Tree,
    state: sled::Tree,
}

impl SledRepoStorage {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(SledRepoStorage {
            blocks: db.open_tree("blocks")?,
            records: db.open_tree("records")?,
            commits: db.open_tree("commits")?,
            commit_log: db.open_tree("commit_log")?,
            state: db.open_tree("state")?,
        })
    }

    pub fn rev(&self) -> Result<Option<String>> {
        Ok(self
            .state
            .get(STATE_REV)?
            .map(|v| String::from_utf8_lossy(&v).to_string()))
    }

    pub fn record_cid(&self, data_key: &str) -> Result<Option<Cid>> {
        match self.records.get(data_key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Cid::try_from(bytes.as_ref())?)),
        }
    }

    fn log_commit(&self, cid: &Cid, bytes: &[u8]) -> Result<()> {
        self.commits.insert(cid.to_bytes(), bytes)?;
        let next_idx = match self.commit_log.last()? {
            Some((key, _)) => u64::from_be_bytes(
                key.as_ref()
                    .try_into()
                    .map_err(|_| anyhow!("corrupt commit log key"))?,
            )
            .wrapping_add(1),
            None => 0,
        };
        self.commit_log
            .insert(next_idx.to_be_bytes(), cid.to_bytes())?;
        // trim the ring
        while self.commit_log.len() > COMMIT_RING_MIN {
            match self.commit_log.pop_min()? {
                Some((_, old_cid)) => {
                    self.commits.remove(old_cid)?;
                }
                None => break,
            }
        }
        Ok(())
    }
}

impl ReadableBlockstore for SledRepoStorage {
    fn get_bytes(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        let key = cid.to_bytes();
        if let Some(bytes) = self.blocks.get(&key)? {
            return Ok(Some(bytes.to_vec()));
        }
        // commits rotated out of the live block set stay readable from the
        // ring for incremental sync
        Ok(self.commits.get(&key)?.map(|bytes| bytes.to_vec()))
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.contains_key(cid.to_bytes())?)
    }

    fn get_blocks(&self, cids: Vec<Cid>) -> Result<BlocksAndMissing> {
        let mut blocks = BlockMap::new();
        let mut missing = Vec::new();
        for cid in cids {
            match self.get_bytes(&cid)? {
                Some(bytes) => blocks.set(cid, bytes),
                None => missing.push(cid),
            }
        }
        Ok(BlocksAndMissing { blocks, missing })
    }
}

impl RepoStorage for SledRepoStorage {
    fn get_root(&self) -> Result<Option<Cid>> {
        match self.state.get(STATE_ROOT)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Cid::try_from(bytes.as_ref())?)),
        }
    }

    fn put_block(&self, cid: Cid, bytes: Vec<u8>, _rev: &str) -> Result<()> {
        self.blocks.insert(cid.to_bytes(), bytes)?;
        Ok(())
    }

    fn put_many(&self, to_put: BlockMap, _rev: &str) -> Result<()> {
        for (cid, bytes) in to_put {
            self.blocks.insert(cid.to_bytes(), bytes)?;
        }
        Ok(())
    }

    fn update_root(&self, cid: Cid, rev: &str) -> Result<()> {
        self.state.insert(STATE_ROOT, cid.to_bytes())?;
        self.state.insert(STATE_REV, rev.as_bytes())?;
        self.state.flush()?;
        Ok(())
    }

    fn delete_block(&self, cid: &Cid) -> Result<()> {
        self.blocks.remove(cid.to_bytes())?;
        Ok(())
    }

    fn apply_commit(&self, commit: CommitData) -> Result<()> {
        let commit_bytes = commit
            .new_blocks
            .get(&commit.cid)
            .cloned()
            .ok_or_else(|| anyhow!("commit block missing from new blocks"))?;
        for (cid, bytes) in commit.new_blocks {
            self.blocks.insert(cid.to_bytes(), bytes)?;
        }
        for cid in commit.removed_cids.to_list() {
            self.blocks.remove(cid.to_bytes())?;
        }
        for op in &commit.ops {
            match op.action {
                WriteOpAction::Create | WriteOpAction::Update => {
                    let cid = op
                        .cid
                        .ok_or_else(|| anyhow!("create/update op without cid"))?;
                    self.records.insert(op.path.as_bytes(), cid.to_bytes())?;
                }
                WriteOpAction::Delete => {
                    self.records.remove(op.path.as_bytes())?;
                }
            }
        }
        self.log_commit(&commit.cid, &commit_bytes)?;
        self.update_root(commit.cid, &commit.rev)
    }
}
