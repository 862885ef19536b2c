use crate::block_map::{BlockMap, BlocksAndMissing};
use crate::error::DataStoreError;
use crate::types::{CommitData, RepoRecord};
use crate::util::parse_record;
use anyhow::Result;
use lexicon_cid::Cid;
use std::sync::RwLock;

/// Read side of a block store. CPU-bound tree code stays synchronous; any
/// real I/O latency lives behind this trait at the persistence edge.
pub trait ReadableBlockstore: Send + Sync {
    fn get_bytes(&self, cid: &Cid) -> Result<Option<Vec<u8>>>;
    fn has(&self, cid: &Cid) -> Result<bool>;
    fn get_blocks(&self, cids: Vec<Cid>) -> Result<BlocksAndMissing>;

    fn read_record(&self, cid: &Cid) -> Result<RepoRecord> {
        match self.get_bytes(cid)? {
            Some(bytes) => parse_record(&bytes),
            None => Err(DataStoreError::MissingBlock(cid.to_string()).into()),
        }
    }
}

/// Write side: one root pointer plus content-addressed blocks.
pub trait RepoStorage: ReadableBlockstore {
    fn get_root(&self) -> Result<Option<Cid>>;
    fn put_block(&self, cid: Cid, bytes: Vec<u8>, rev: &str) -> Result<()>;
    fn put_many(&self, to_put: BlockMap, rev: &str) -> Result<()>;
    fn update_root(&self, cid: Cid, rev: &str) -> Result<()>;

    fn apply_commit(&self, commit: CommitData) -> Result<()> {
        let rev = commit.rev.clone();
        self.put_many(commit.new_blocks, &rev)?;
        for cid in commit.removed_cids.to_list() {
            self.delete_block(&cid)?;
        }
        self.update_root(commit.cid, &rev)
    }

    fn delete_block(&self, cid: &Cid) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryBlockstore {
    blocks: RwLock<BlockMap>,
    root: RwLock<Option<Cid>>,
    rev: RwLock<Option<String>>,
}

impl MemoryBlockstore {
    pub fn new(blocks: Option<BlockMap>) -> Self {
        let this = Self::default();
        if let Some(blocks) = blocks {
            this.blocks
                .write()
                .expect("memory blockstore lock poisoned")
                .add_map(blocks);
        }
        this
    }

    pub fn rev(&self) -> Option<String> {
        self.rev
            .read()
            .expect("memory blockstore lock poisoned")
            .clone()
    }
}

impl ReadableBlockstore for MemoryBlockstore {
    fn get_bytes(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        let blocks = self.blocks.read().expect("memory blockstore lock poisoned");
        Ok(blocks.get(cid).cloned())
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        let blocks = self.blocks.read().expect("memory blockstore lock poisoned");
        Ok(blocks.has(cid))
    }

    fn get_blocks(&self, cids: Vec<Cid>) -> Result<BlocksAndMissing> {
        let blocks = self.blocks.read().expect("memory blockstore lock poisoned");
        Ok(blocks.get_many(cids))
    }
}

impl RepoStorage for MemoryBlockstore {
    fn get_root(&self) -> Result<Option<Cid>> {
        Ok(*self.root.read().expect("memory blockstore lock poisoned"))
    }

    fn put_block(&self, cid: Cid, bytes: Vec<u8>, _rev: &str) -> Result<()> {
        self.blocks
            .write()
            .expect("memory blockstore lock poisoned")
            .set(cid, bytes);
        Ok(())
    }

    fn put_many(&self, to_put: BlockMap, _rev: &str) -> Result<()> {
        self.blocks
            .write()
            .expect("memory blockstore lock poisoned")
            .add_map(to_put);
        Ok(())
    }

    fn update_root(&self, cid: Cid, rev: &str) -> Result<()> {
        *self.root.write().expect("memory blockstore lock poisoned") = Some(cid);
        *self.rev.write().expect("memory blockstore lock poisoned") = Some(rev.to_string());
        Ok(())
    }

    fn delete_block(&self, cid: &Cid) -> Result<()> {
        self.blocks
            .write()
            .expect("memory blockstore lock poisoned")
            .delete(cid);
        Ok(())
    }
}
