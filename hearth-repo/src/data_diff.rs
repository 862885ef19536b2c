use crate::block_map::BlockMap;
use crate::cid_set::CidSet;
use crate::mst::diff::mst_diff;
use crate::mst::{Mst, NodeEntry};
use anyhow::Result;
use lexicon_cid::Cid;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct DataAdd {
    pub key: String,
    pub cid: Cid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    pub key: String,
    pub prev: Cid,
    pub cid: Cid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataDelete {
    pub key: String,
    pub cid: Cid,
}

/// What changed between two tree roots: per-key creates/updates/deletes plus
/// the block-level delta needed to persist and broadcast the change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataDiff {
    pub adds: HashMap<String, DataAdd>,
    pub updates: HashMap<String, DataUpdate>,
    pub deletes: HashMap<String, DataDelete>,

    pub new_mst_blocks: BlockMap,
    pub new_leaf_cids: CidSet,
    pub removed_cids: CidSet,
}

impl DataDiff {
    pub fn new() -> Self {
        DataDiff::default()
    }

    pub fn of(curr: &mut Mst, prev: Option<&mut Mst>) -> Result<DataDiff> {
        mst_diff(curr, prev)
    }

    pub(crate) fn node_add(&mut self, node: NodeEntry) -> Result<()> {
        match node {
            NodeEntry::Leaf(leaf) => self.leaf_add(&leaf.key, leaf.value),
            NodeEntry::Mst(mut tree) => {
                let data = tree.serialize()?;
                self.tree_add(data.cid, data.bytes);
            }
        }
        Ok(())
    }

    pub(crate) fn node_delete(&mut self, node: NodeEntry) -> Result<()> {
        match node {
            NodeEntry::Leaf(leaf) => {
                self.deletes.insert(
                    leaf.key.clone(),
                    DataDelete {
                        key: leaf.key,
                        cid: leaf.value,
                    },
                );
                self.removed_cids.add(leaf.value);
            }
            NodeEntry::Mst(mut tree) => {
                let cid = tree.get_pointer()?;
                self.tree_delete(cid);
            }
        }
        Ok(())
    }

    pub(crate) fn leaf_add(&mut self, key: &str, cid: Cid) {
        self.adds.insert(
            key.to_string(),
            DataAdd {
                key: key.to_string(),
                cid,
            },
        );
        if self.removed_cids.has(&cid) {
            self.removed_cids.delete(&cid);
        } else {
            self.new_leaf_cids.add(cid);
        }
    }

    pub(crate) fn leaf_update(&mut self, key: &str, prev: Cid, cid: Cid) {
        if prev == cid {
            return;
        }
        self.updates.insert(
            key.to_string(),
            DataUpdate {
                key: key.to_string(),
                prev,
                cid,
            },
        );
        self.removed_cids.add(prev);
        self.new_leaf_cids.add(cid);
    }

    pub(crate) fn leaf_delete(&mut self, key: &str, cid: Cid) {
        self.deletes.insert(
            key.to_string(),
            DataDelete {
                key: key.to_string(),
                cid,
            },
        );
        if self.new_leaf_cids.has(&cid) {
            self.new_leaf_cids.delete(&cid);
        } else {
            self.removed_cids.add(cid);
        }
    }

    pub(crate) fn tree_add(&mut self, cid: Cid, bytes: Vec<u8>) {
        if self.removed_cids.has(&cid) {
            self.removed_cids.delete(&cid);
        } else {
            self.new_mst_blocks.set(cid, bytes);
        }
    }

    pub(crate) fn tree_delete(&mut self, cid: Cid) {
        if self.new_mst_blocks.has(&cid) {
            self.new_mst_blocks.delete(&cid);
        } else {
            self.removed_cids.add(cid);
        }
    }

    pub fn add_list(&self) -> Vec<DataAdd> {
        self.adds.values().cloned().collect()
    }

    pub fn update_list(&self) -> Vec<DataUpdate> {
        self.updates.values().cloned().collect()
    }

    pub fn delete_list(&self) -> Vec<DataDelete> {
        self.deletes.values().cloned().collect()
    }
}
