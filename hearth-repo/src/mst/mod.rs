//! Merkle search tree: an ordered, insert-order-independent, deterministic
//! key→CID index.
//!
//! Each key is hashed with SHA-256 and its count of leading zero bits picks
//! the layer the key lives on. Every subtree is addressed by the CID of its
//! node, so any leaf change re-hashes exactly the path to the root.
//!
//! A node serializes as `{l, e}`: an optional link to the subtree left of
//! every key, then an ordered entry array. Leaf entries carry `{k, v}` with
//! the full key; subtree pointers carry `{k, p, t}` where `k` is the
//! preceding leaf key acting as the range splitter and `p` is the child's
//! layer.

pub mod diff;
pub mod walker;

use crate::block_map::BlockMap;
use crate::cbor;
use crate::cid::cid_for_cbor_bytes;
use crate::cid_set::CidSet;
use crate::error::DataStoreError;
use crate::storage::RepoStorage;
use crate::types::CidAndBytes;
use anyhow::{anyhow, Result};
use lexicon_cid::Cid;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

#[derive(PartialEq, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    #[serde(with = "serde_bytes")]
    pub k: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<Cid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<Cid>,
}

impl Debug for TreeEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeEntry")
            .field("k", &String::from_utf8_lossy(&self.k))
            .field("v", &self.v.map(|c| c.to_string()))
            .field("p", &self.p)
            .field("t", &self.t.map(|c| c.to_string()))
            .finish()
    }
}

/// MST node as it goes to storage.
#[derive(PartialEq, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub l: Option<Cid>,
    pub e: Vec<TreeEntry>,
}

impl Debug for NodeData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("l", &self.l.map(|c| c.to_string()))
            .field("e", &self.e)
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct Leaf {
    pub key: String,
    pub value: Cid,
}

impl Debug for Leaf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("key", &self.key)
            .field("value", &self.value.to_string())
            .finish()
    }
}

/// A node entry is either a leaf or a pointer to a lower subtree.
#[derive(Clone, Debug)]
pub enum NodeEntry {
    Mst(Mst),
    Leaf(Leaf),
}

impl NodeEntry {
    pub fn is_tree(&self) -> bool {
        matches!(self, NodeEntry::Mst(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeEntry::Leaf(_))
    }
}

fn is_valid_chars(input: &str) -> bool {
    input
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'~'))
}

pub fn is_valid_mst_key(key: &str) -> bool {
    let split: Vec<&str> = key.split('/').collect();
    key.len() <= 256
        && split.len() == 2
        && !split[0].is_empty()
        && !split[1].is_empty()
        && is_valid_chars(split[0])
        && is_valid_chars(split[1])
}

pub fn ensure_valid_mst_key(key: &str) -> Result<()> {
    if is_valid_mst_key(key) {
        Ok(())
    } else {
        Err(anyhow!("Invalid MST key: {}", key))
    }
}

/// Count of leading zero bits of sha256(key); assigns the key's layer.
pub fn leading_zeros_on_hash(key: &[u8]) -> u32 {
    let digest = Sha256::digest(key);
    let mut zeros = 0;
    for byte in digest.as_slice() {
        zeros += byte.leading_zeros();
        if *byte != 0 {
            break;
        }
    }
    zeros
}

#[derive(Debug)]
pub struct UnstoredBlocks {
    pub root: Cid,
    pub blocks: BlockMap,
}

/// A tree node in one of three hydration states: fully hydrated (entries and
/// pointer valid), dirty (entries valid, pointer stale) or virtual (pointer
/// only, entries still in storage).
///
/// Values are immutable: mutating operations return a new `Mst`.
#[derive(Clone)]
pub struct Mst {
    storage: Arc<dyn RepoStorage>,
    entries: Option<Vec<NodeEntry>>,
    pointer: Cid,
    outdated_pointer: bool,
    pub layer: Option<u32>,
}

impl Debug for Mst {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mst")
            .field("pointer", &self.pointer.to_string())
            .field("layer", &self.layer)
            .field("outdated_pointer", &self.outdated_pointer)
            .field("entries", &self.entries)
            .finish()
    }
}

impl Mst {
    pub fn new(
        storage: Arc<dyn RepoStorage>,
        pointer: Cid,
        entries: Option<Vec<NodeEntry>>,
        layer: Option<u32>,
    ) -> Self {
        Mst {
            storage,
            entries,
            pointer,
            outdated_pointer: false,
            layer,
        }
    }

    pub fn create(
        storage: Arc<dyn RepoStorage>,
        entries: Option<Vec<NodeEntry>>,
        layer: Option<u32>,
    ) -> Result<Self> {
        let mut mst = Mst::new(
            storage,
            // placeholder, recomputed immediately
            Cid::default(),
            Some(entries.unwrap_or_default()),
            layer,
        );
        mst.outdated_pointer = true;
        mst.get_pointer()?;
        Ok(mst)
    }

    /// Lazy load: nothing is read from storage until entries are needed.
    pub fn load(storage: Arc<dyn RepoStorage>, cid: Cid, layer: Option<u32>) -> Self {
        Mst::new(storage, cid, None, layer)
    }

    /// A copy with replaced entries and a stale pointer.
    fn new_tree(&self, entries: Vec<NodeEntry>) -> Mst {
        let mut mst = Mst::new(self.storage.clone(), self.pointer, Some(entries), self.layer);
        mst.outdated_pointer = true;
        mst
    }

    // Hydration

    fn ensure_hydrated(&mut self) -> Result<()> {
        if self.entries.is_some() {
            return Ok(());
        }
        let bytes = self
            .storage
            .get_bytes(&self.pointer)?
            .ok_or_else(|| DataStoreError::MissingBlock(self.pointer.to_string()))?;
        let data: NodeData = cbor::cbor_to_struct(&bytes)?;
        let layer = layer_for_node_data(&data).or(self.layer);
        self.entries = Some(deserialize_node_data(self.storage.clone(), &data)?);
        self.layer = layer;
        Ok(())
    }

    pub fn get_entries(&mut self) -> Result<Vec<NodeEntry>> {
        self.ensure_hydrated()?;
        Ok(self.entries.clone().expect("hydrated above"))
    }

    fn entries_mut(&mut self) -> Result<&mut Vec<NodeEntry>> {
        self.ensure_hydrated()?;
        Ok(self.entries.as_mut().expect("hydrated above"))
    }

    /// Pointer recomputation is deferred until somebody asks.
    pub fn get_pointer(&mut self) -> Result<Cid> {
        if !self.outdated_pointer {
            return Ok(self.pointer);
        }
        let serialized = self.serialize()?;
        self.pointer = serialized.cid;
        self.outdated_pointer = false;
        Ok(serialized.cid)
    }

    pub fn serialize(&mut self) -> Result<CidAndBytes> {
        let layer = self.get_layer()?;
        // settle children first so their pointers are current
        for entry in self.entries_mut()? {
            if let NodeEntry::Mst(child) = entry {
                if child.outdated_pointer {
                    child.get_pointer()?;
                }
            }
        }
        let entries = self.get_entries()?;
        let data = serialize_node_data(&entries, layer)?;
        let bytes = cbor::struct_to_cbor(&data)?;
        Ok(CidAndBytes {
            cid: cid_for_cbor_bytes(&bytes)?,
            bytes,
        })
    }

    /// The topmost node's layer comes from any leaf we can find; an empty
    /// tree is layer 0.
    pub fn get_layer(&mut self) -> Result<u32> {
        self.layer = self.attempt_get_layer()?;
        Ok(self.layer.unwrap_or(0))
    }

    fn attempt_get_layer(&mut self) -> Result<Option<u32>> {
        if self.layer.is_some() {
            return Ok(self.layer);
        }
        let entries = self.get_entries()?;
        let mut layer = layer_for_entries(&entries);
        if layer.is_none() {
            for entry in entries {
                if let NodeEntry::Mst(mut tree) = entry {
                    if let Some(child_layer) = tree.attempt_get_layer()? {
                        layer = Some(child_layer + 1);
                        break;
                    }
                }
            }
        }
        if layer.is_some() {
            self.layer = layer;
        }
        Ok(layer)
    }

    // Core operations

    /// Blocks that storage does not have yet, for this node and below.
    pub fn get_unstored_blocks(&mut self) -> Result<UnstoredBlocks> {
        let mut blocks = BlockMap::new();
        let pointer = self.get_pointer()?;
        if self.storage.has(&pointer)? {
            return Ok(UnstoredBlocks {
                root: pointer,
                blocks,
            });
        }
        let serialized = self.serialize()?;
        blocks.set(serialized.cid, serialized.bytes);
        for entry in self.entries_mut()? {
            if let NodeEntry::Mst(child) = entry {
                let subtree = child.get_unstored_blocks()?;
                blocks.add_map(subtree.blocks);
            }
        }
        Ok(UnstoredBlocks {
            root: pointer,
            blocks,
        })
    }

    /// Adds a new leaf. Errors if the key is already present.
    pub fn add(&mut self, key: &str, value: Cid, known_zeros: Option<u32>) -> Result<Mst> {
        ensure_valid_mst_key(key)?;
        let key_zeros = known_zeros.unwrap_or_else(|| leading_zeros_on_hash(key.as_bytes()));
        let layer = self.get_layer()?;
        let new_leaf = Leaf {
            key: key.to_string(),
            value,
        };

        if key_zeros == layer {
            // belongs in this node
            let index = self.find_gt_or_equal_leaf_index(key)?;
            if let Some(NodeEntry::Leaf(l)) = self.at_index(index)? {
                if l.key == key {
                    return Err(anyhow!("There is already a value at key: {}", key));
                }
            }
            match self.at_index(index - 1)? {
                // entry before is a leaf (or nothing): splice in
                None | Some(NodeEntry::Leaf(_)) => {
                    self.splice_in(NodeEntry::Leaf(new_leaf), index)
                }
                // entry before is a tree: split it around the key
                Some(NodeEntry::Mst(mut prev)) => {
                    let (left, right) = prev.split_around(key)?;
                    self.replace_with_split(index - 1, left, new_leaf, right)
                }
            }
        } else if key_zeros < layer {
            // belongs in a subtree
            let index = self.find_gt_or_equal_leaf_index(key)?;
            match self.at_index(index - 1)? {
                Some(NodeEntry::Mst(mut prev)) => {
                    let new_subtree = prev.add(key, value, Some(key_zeros))?;
                    self.update_entry(index - 1, NodeEntry::Mst(new_subtree))
                }
                _ => {
                    let mut subtree = self.create_child()?;
                    let new_subtree = subtree.add(key, value, Some(key_zeros))?;
                    self.splice_in(NodeEntry::Mst(new_subtree), index)
                }
            }
        } else {
            // belongs above: split this tree and hang it off a new root
            let (mut left, mut right) = self.split_around(key)?;
            let extra_layers = key_zeros - layer;
            // splitting handled one layer; add structural nodes for the rest
            for _ in 1..extra_layers {
                left = match left {
                    Some(l) => Some(l.create_parent()?),
                    None => None,
                };
                right = match right {
                    Some(r) => Some(r.create_parent()?),
                    None => None,
                };
            }
            let mut updated: Vec<NodeEntry> = Vec::new();
            if let Some(l) = left {
                updated.push(NodeEntry::Mst(l));
            }
            updated.push(NodeEntry::Leaf(new_leaf));
            if let Some(r) = right {
                updated.push(NodeEntry::Mst(r));
            }
            Mst::create(self.storage.clone(), Some(updated), Some(key_zeros))
        }
    }

    pub fn get(&mut self, key: &str) -> Result<Option<Cid>> {
        let index = self.find_gt_or_equal_leaf_index(key)?;
        if let Some(NodeEntry::Leaf(found)) = self.at_index(index)? {
            if found.key == key {
                return Ok(Some(found.value));
            }
        }
        if let Some(NodeEntry::Mst(mut prev)) = self.at_index(index - 1)? {
            return prev.get(key);
        }
        Ok(None)
    }

    /// Replaces the value at an existing key.
    pub fn update(&mut self, key: &str, value: Cid) -> Result<Mst> {
        ensure_valid_mst_key(key)?;
        let index = self.find_gt_or_equal_leaf_index(key)?;
        if let Some(NodeEntry::Leaf(found)) = self.at_index(index)? {
            if found.key == key {
                return self.update_entry(
                    index,
                    NodeEntry::Leaf(Leaf {
                        key: key.to_string(),
                        value,
                    }),
                );
            }
        }
        if let Some(NodeEntry::Mst(mut prev)) = self.at_index(index - 1)? {
            let updated = prev.update(key, value)?;
            return self.update_entry(index - 1, NodeEntry::Mst(updated));
        }
        Err(anyhow!("Could not find a record with key: {}", key))
    }

    pub fn delete(&mut self, key: &str) -> Result<Mst> {
        let altered = self.delete_recurse(key)?;
        altered.trim_top()
    }

    fn delete_recurse(&mut self, key: &str) -> Result<Mst> {
        let index = self.find_gt_or_equal_leaf_index(key)?;
        if let Some(NodeEntry::Leaf(found)) = self.at_index(index)? {
            if found.key == key {
                // merge the neighbouring subtrees the leaf was separating
                return match (self.at_index(index - 1)?, self.at_index(index + 1)?) {
                    (Some(NodeEntry::Mst(mut prev)), Some(NodeEntry::Mst(next))) => {
                        let merged = prev.append_merge(next)?;
                        let mut entries: Vec<NodeEntry> = Vec::new();
                        entries.extend(self.slice(Some(0), Some(index - 1))?);
                        entries.push(NodeEntry::Mst(merged));
                        entries.extend(self.slice(Some(index + 2), None)?);
                        Ok(self.new_tree(entries))
                    }
                    _ => self.remove_entry(index),
                };
            }
        }
        match self.at_index(index - 1)? {
            Some(NodeEntry::Mst(mut prev)) => {
                let mut subtree = prev.delete_recurse(key)?;
                if subtree.get_entries()?.is_empty() {
                    self.remove_entry(index - 1)
                } else {
                    self.update_entry(index - 1, NodeEntry::Mst(subtree))
                }
            }
            _ => Err(anyhow!("Could not find a record with key: {}", key)),
        }
    }

    // Simple operations

    fn update_entry(&mut self, index: isize, entry: NodeEntry) -> Result<Mst> {
        let mut updated = self.slice(Some(0), Some(index))?;
        updated.push(entry);
        updated.extend(self.slice(Some(index + 1), None)?);
        Ok(self.new_tree(updated))
    }

    fn remove_entry(&mut self, index: isize) -> Result<Mst> {
        let mut updated = self.slice(Some(0), Some(index))?;
        updated.extend(self.slice(Some(index + 1), None)?);
        Ok(self.new_tree(updated))
    }

    fn append(&mut self, entry: NodeEntry) -> Result<Mst> {
        let mut entries = self.get_entries()?;
        entries.push(entry);
        Ok(self.new_tree(entries))
    }

    fn prepend(&mut self, entry: NodeEntry) -> Result<Mst> {
        let mut entries = self.get_entries()?;
        entries.insert(0, entry);
        Ok(self.new_tree(entries))
    }

    pub fn at_index(&mut self, index: isize) -> Result<Option<NodeEntry>> {
        if index < 0 {
            return Ok(None);
        }
        let entries = self.get_entries()?;
        Ok(entries.into_iter().nth(index as usize))
    }

    fn slice(&mut self, start: Option<isize>, end: Option<isize>) -> Result<Vec<NodeEntry>> {
        let entries = self.get_entries()?;
        let len = entries.len() as isize;
        let clamp = |v: isize| -> usize { v.clamp(0, len) as usize };
        let start = clamp(start.unwrap_or(0));
        let end = clamp(end.unwrap_or(len));
        if end <= start {
            return Ok(vec![]);
        }
        Ok(entries[start..end].to_vec())
    }

    fn splice_in(&mut self, entry: NodeEntry, index: isize) -> Result<Mst> {
        let mut updated = self.slice(Some(0), Some(index))?;
        updated.push(entry);
        updated.extend(self.slice(Some(index), None)?);
        Ok(self.new_tree(updated))
    }

    fn replace_with_split(
        &mut self,
        index: isize,
        left: Option<Mst>,
        leaf: Leaf,
        right: Option<Mst>,
    ) -> Result<Mst> {
        let mut updated = self.slice(Some(0), Some(index))?;
        if let Some(l) = left {
            updated.push(NodeEntry::Mst(l));
        }
        updated.push(NodeEntry::Leaf(leaf));
        if let Some(r) = right {
            updated.push(NodeEntry::Mst(r));
        }
        updated.extend(self.slice(Some(index + 1), None)?);
        Ok(self.new_tree(updated))
    }

    /// While the root only points at another tree, the top can be trimmed.
    fn trim_top(mut self) -> Result<Mst> {
        let entries = self.get_entries()?;
        if entries.len() == 1 {
            if let Some(NodeEntry::Mst(sub)) = entries.into_iter().next() {
                return sub.trim_top();
            }
        }
        Ok(self)
    }

    // Subtree splits and merges

    fn split_around(&mut self, key: &str) -> Result<(Option<Mst>, Option<Mst>)> {
        let index = self.find_gt_or_equal_leaf_index(key)?;
        let left_data = self.slice(Some(0), Some(index))?;
        let right_data = self.slice(Some(index), None)?;
        let mut left = self.new_tree(left_data.clone());
        let mut right = self.new_tree(right_data);

        // the far right of the left side may itself need splitting on key
        if let Some(NodeEntry::Mst(mut last)) = left_data.last().cloned() {
            left = left.remove_entry(left_data.len() as isize - 1)?;
            let (sub_left, sub_right) = last.split_around(key)?;
            if let Some(sl) = sub_left {
                left = left.append(NodeEntry::Mst(sl))?;
            }
            if let Some(sr) = sub_right {
                right = right.prepend(NodeEntry::Mst(sr))?;
            }
        }

        let left_out = match left.get_entries()?.len() {
            0 => None,
            _ => Some(left),
        };
        let right_out = match right.get_entries()?.len() {
            0 => None,
            _ => Some(right),
        };
        Ok((left_out, right_out))
    }

    /// Merge when every key in `to_merge` is greater than every key here
    /// (the delete path).
    fn append_merge(&mut self, mut to_merge: Mst) -> Result<Mst> {
        if self.get_layer()? != to_merge.get_layer()? {
            return Err(anyhow!(
                "Trying to merge two nodes from different layers of the MST"
            ));
        }
        let mut self_entries = self.get_entries()?;
        let mut merge_entries = to_merge.get_entries()?;
        match (self_entries.last().cloned(), merge_entries.first().cloned()) {
            (Some(NodeEntry::Mst(mut l)), Some(NodeEntry::Mst(r))) => {
                let merged = l.append_merge(r)?;
                self_entries.pop();
                merge_entries.remove(0);
                self_entries.push(NodeEntry::Mst(merged));
                self_entries.append(&mut merge_entries);
            }
            _ => self_entries.append(&mut merge_entries),
        }
        Ok(self.new_tree(self_entries))
    }

    fn create_child(&mut self) -> Result<Mst> {
        let layer = self.get_layer()?;
        Mst::create(
            self.storage.clone(),
            Some(Vec::new()),
            Some(layer.saturating_sub(1)),
        )
    }

    fn create_parent(mut self) -> Result<Mst> {
        let layer = self.get_layer()?;
        let storage = self.storage.clone();
        let mut parent = Mst::new(
            storage,
            Cid::default(),
            Some(vec![NodeEntry::Mst(self)]),
            Some(layer + 1),
        );
        parent.outdated_pointer = true;
        Ok(parent)
    }

    /// Index of the first leaf with key >= the given key.
    fn find_gt_or_equal_leaf_index(&mut self, key: &str) -> Result<isize> {
        let entries = self.get_entries()?;
        let found = entries.iter().position(|entry| match entry {
            NodeEntry::Mst(_) => false,
            NodeEntry::Leaf(leaf) => leaf.key.as_str() >= key,
        });
        Ok(found.unwrap_or(entries.len()) as isize)
    }

    // Traversal

    /// All leaves with key >= `key`, in order.
    pub fn walk_leaves_from(&mut self, key: &str) -> Result<Vec<Leaf>> {
        let mut leaves: Vec<Leaf> = Vec::new();
        self.walk_leaves_from_into(key, &mut leaves)?;
        Ok(leaves)
    }

    fn walk_leaves_from_into(&mut self, key: &str, out: &mut Vec<Leaf>) -> Result<()> {
        let index = self.find_gt_or_equal_leaf_index(key)? as usize;
        let entries = self.get_entries()?;
        if index > 0 {
            if let Some(NodeEntry::Mst(prev)) = entries.get(index - 1) {
                prev.clone().walk_leaves_from_into(key, out)?;
            }
        }
        for entry in entries.into_iter().skip(index) {
            match entry {
                NodeEntry::Leaf(leaf) => out.push(leaf),
                NodeEntry::Mst(mut tree) => tree.walk_leaves_from_into(key, out)?,
            }
        }
        Ok(())
    }

    pub fn list(
        &mut self,
        count: Option<usize>,
        after: Option<&str>,
        before: Option<&str>,
    ) -> Result<Vec<Leaf>> {
        let after = after.unwrap_or("");
        let mut vals: Vec<Leaf> = Vec::new();
        for leaf in self.walk_leaves_from(after)? {
            if leaf.key == after {
                continue;
            }
            if vals.len() >= count.unwrap_or(usize::MAX) {
                break;
            }
            if let Some(b) = before {
                if leaf.key.as_str() >= b {
                    break;
                }
            }
            vals.push(leaf);
        }
        Ok(vals)
    }

    pub fn list_with_prefix(&mut self, prefix: &str, count: Option<usize>) -> Result<Vec<Leaf>> {
        let mut vals: Vec<Leaf> = Vec::new();
        for leaf in self.walk_leaves_from(prefix)? {
            if vals.len() >= count.unwrap_or(usize::MAX) || !leaf.key.starts_with(prefix) {
                break;
            }
            vals.push(leaf);
        }
        Ok(vals)
    }

    pub fn leaves(&mut self) -> Result<Vec<Leaf>> {
        self.walk_leaves_from("")
    }

    pub fn leaf_count(&mut self) -> Result<usize> {
        Ok(self.leaves()?.len())
    }

    /// Every node block reachable from this node, plus the set of leaf CIDs.
    pub fn collect_blocks(&mut self, nodes: &mut BlockMap, leaves: &mut CidSet) -> Result<()> {
        let serialized = self.serialize()?;
        nodes.set(serialized.cid, serialized.bytes);
        for entry in self.get_entries()? {
            match entry {
                NodeEntry::Leaf(leaf) => leaves.add(leaf.value),
                NodeEntry::Mst(mut tree) => tree.collect_blocks(nodes, leaves)?,
            }
        }
        Ok(())
    }

    /// Node blocks along the path to `key` plus the leaf block CID, for
    /// firehose `relevant_blocks`.
    pub fn add_blocks_for_path(&mut self, key: &str, blocks: &mut BlockMap) -> Result<()> {
        let serialized = self.serialize()?;
        blocks.set(serialized.cid, serialized.bytes);
        let index = self.find_gt_or_equal_leaf_index(key)?;
        if let Some(NodeEntry::Leaf(found)) = self.at_index(index)? {
            if found.key == key {
                return Ok(());
            }
        }
        if let Some(NodeEntry::Mst(mut prev)) = self.at_index(index - 1)? {
            return prev.add_blocks_for_path(key, blocks);
        }
        Ok(())
    }
}

// Node wire form

fn layer_for_entries(entries: &[NodeEntry]) -> Option<u32> {
    entries.iter().find_map(|entry| match entry {
        NodeEntry::Leaf(leaf) => Some(leading_zeros_on_hash(leaf.key.as_bytes())),
        NodeEntry::Mst(_) => None,
    })
}

fn layer_for_node_data(data: &NodeData) -> Option<u32> {
    data.e.iter().find_map(|entry| {
        if entry.v.is_some() {
            Some(leading_zeros_on_hash(&entry.k))
        } else {
            entry.p.map(|p| p + 1)
        }
    })
}

pub fn serialize_node_data(entries: &[NodeEntry], layer: u32) -> Result<NodeData> {
    let mut data = NodeData {
        l: None,
        e: Vec::new(),
    };
    let mut i = 0;
    if let Some(NodeEntry::Mst(first)) = entries.first() {
        i += 1;
        data.l = Some(first.clone().get_pointer()?);
    }
    let mut last_key: Option<&str> = None;
    while i < entries.len() {
        match &entries[i] {
            NodeEntry::Leaf(leaf) => {
                ensure_valid_mst_key(&leaf.key)?;
                data.e.push(TreeEntry {
                    k: leaf.key.as_bytes().to_vec(),
                    v: Some(leaf.value),
                    p: None,
                    t: None,
                });
                last_key = Some(&leaf.key);
            }
            NodeEntry::Mst(tree) => {
                let splitter = last_key
                    .ok_or_else(|| anyhow!("Not a valid node: two subtrees next to each other"))?;
                data.e.push(TreeEntry {
                    k: splitter.as_bytes().to_vec(),
                    v: None,
                    p: Some(layer.saturating_sub(1)),
                    t: Some(tree.clone().get_pointer()?),
                });
                last_key = None;
            }
        }
        i += 1;
    }
    Ok(data)
}

pub fn deserialize_node_data(
    storage: Arc<dyn RepoStorage>,
    data: &NodeData,
) -> Result<Vec<NodeEntry>> {
    let mut entries: Vec<NodeEntry> = Vec::new();
    let left_layer = layer_for_node_data(data).map(|l| l.saturating_sub(1));
    if let Some(l) = data.l {
        entries.push(NodeEntry::Mst(Mst::load(storage.clone(), l, left_layer)));
    }
    for entry in &data.e {
        match (entry.v, entry.t) {
            (Some(value), None) => {
                let key = String::from_utf8(entry.k.clone())
                    .map_err(|_| anyhow!("MST key is not utf-8"))?;
                ensure_valid_mst_key(&key)?;
                entries.push(NodeEntry::Leaf(Leaf { key, value }));
            }
            (None, Some(subtree)) => {
                entries.push(NodeEntry::Mst(Mst::load(storage.clone(), subtree, entry.p)));
            }
            _ => return Err(anyhow!("Malformed MST node entry")),
        }
    }
    Ok(entries)
}

pub fn cid_for_entries(entries: &[NodeEntry], layer: u32) -> Result<Cid> {
    let data = serialize_node_data(entries, layer)?;
    Ok(crate::cid::cid_for_cbor(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::cid_for_cbor;
    use crate::data_diff::DataDiff;
    use crate::storage::MemoryBlockstore;
    use hearth_common::tid::Ticker;
    use ipld_core::ipld;
    use rand::prelude::SliceRandom;
    use rand::thread_rng;
    use std::collections::BTreeMap;

    fn storage() -> Arc<dyn RepoStorage> {
        Arc::new(MemoryBlockstore::new(None))
    }

    fn random_cid(i: usize) -> Cid {
        cid_for_cbor(&ipld!({ "test": i as i64 })).unwrap()
    }

    fn bulk_keys(count: usize) -> BTreeMap<String, Cid> {
        let mut ticker = Ticker::new();
        (0..count)
            .map(|i| {
                (
                    format!("com.example.record/{}", ticker.next(None)),
                    random_cid(i),
                )
            })
            .collect()
    }

    fn tree_with(storage: Arc<dyn RepoStorage>, mapping: &BTreeMap<String, Cid>) -> Mst {
        let mut mst = Mst::create(storage, None, None).unwrap();
        for (key, cid) in mapping {
            mst = mst.add(key, *cid, None).unwrap();
        }
        mst
    }

    #[test]
    fn adds_and_gets_records() {
        let mapping = bulk_keys(100);
        let mut mst = tree_with(storage(), &mapping);
        for (key, cid) in &mapping {
            assert_eq!(mst.get(key).unwrap(), Some(*cid));
        }
        assert_eq!(mst.leaf_count().unwrap(), 100);
        assert_eq!(mst.get("com.example.record/zzzzzzzzzzzzz").unwrap(), None);
    }

    #[test]
    fn rejects_duplicate_add() {
        let mut mst = Mst::create(storage(), None, None).unwrap();
        let cid = random_cid(0);
        let mut mst = mst.add("com.example.record/aaaaaaaaaaaaa", cid, None).unwrap();
        assert!(mst.add("com.example.record/aaaaaaaaaaaaa", cid, None).is_err());
    }

    #[test]
    fn updates_and_deletes() {
        let mapping = bulk_keys(50);
        let mut mst = tree_with(storage(), &mapping);
        let (first_key, _) = mapping.iter().next().unwrap();
        let updated_cid = random_cid(9999);
        mst = mst.update(first_key, updated_cid).unwrap();
        assert_eq!(mst.get(first_key).unwrap(), Some(updated_cid));

        mst = mst.delete(first_key).unwrap();
        assert_eq!(mst.get(first_key).unwrap(), None);
        assert_eq!(mst.leaf_count().unwrap(), 49);
    }

    #[test]
    fn delete_of_added_key_restores_root() {
        let mapping = bulk_keys(30);
        let store = storage();
        let mut base = tree_with(store.clone(), &mapping);
        let base_pointer = base.get_pointer().unwrap();

        let extra_key = "com.example.record/aaaaaaaaaaaaa";
        let mut with_extra = base.add(extra_key, random_cid(31), None).unwrap();
        let mut back = with_extra.delete(extra_key).unwrap();
        assert_eq!(back.get_pointer().unwrap(), base_pointer);
    }

    #[test]
    fn shape_is_insertion_order_independent() {
        let mapping = bulk_keys(60);
        let mut reference: Option<Cid> = None;
        for _ in 0..3 {
            let mut shuffled: Vec<(String, Cid)> =
                mapping.iter().map(|(k, v)| (k.clone(), *v)).collect();
            shuffled.shuffle(&mut thread_rng());
            let mut mst = Mst::create(storage(), None, None).unwrap();
            for (key, cid) in shuffled {
                mst = mst.add(&key, cid, None).unwrap();
            }
            let pointer = mst.get_pointer().unwrap();
            match reference {
                None => reference = Some(pointer),
                Some(expected) => assert_eq!(pointer, expected),
            }
        }
    }

    #[test]
    fn list_is_in_key_order() {
        let mapping = bulk_keys(40);
        let mut mst = tree_with(storage(), &mapping);
        let listed = mst.leaves().unwrap();
        let keys: Vec<&String> = mapping.keys().collect();
        assert_eq!(
            listed.iter().map(|l| &l.key).collect::<Vec<_>>(),
            keys,
            "walk order equals sorted key order"
        );
    }

    #[test]
    fn list_with_prefix_and_pagination() {
        let mut ticker = Ticker::new();
        let store = storage();
        let mut mst = Mst::create(store, None, None).unwrap();
        let mut post_keys = Vec::new();
        for i in 0..10 {
            let key = format!("app.bsky.feed.post/{}", ticker.next(None));
            mst = mst.add(&key, random_cid(i), None).unwrap();
            post_keys.push(key);
        }
        for i in 0..5 {
            let key = format!("app.bsky.feed.like/{}", ticker.next(None));
            mst = mst.add(&key, random_cid(100 + i), None).unwrap();
        }
        let posts = mst.list_with_prefix("app.bsky.feed.post/", None).unwrap();
        assert_eq!(posts.len(), 10);
        assert!(posts.iter().all(|l| l.key.starts_with("app.bsky.feed.post/")));

        let first_page = mst.list_with_prefix("app.bsky.feed.post/", Some(4)).unwrap();
        assert_eq!(first_page.len(), 4);
        assert_eq!(first_page[0].key, post_keys[0]);
    }

    #[test]
    fn round_trips_through_storage() {
        let mapping = bulk_keys(25);
        let store = storage();
        let mut mst = tree_with(store.clone(), &mapping);
        let unstored = mst.get_unstored_blocks().unwrap();
        store.put_many(unstored.blocks, "3jui7kd54zh2y").unwrap();

        let mut loaded = Mst::load(store, unstored.root, None);
        for (key, cid) in &mapping {
            assert_eq!(loaded.get(key).unwrap(), Some(*cid));
        }
        assert_eq!(loaded.get_pointer().unwrap(), unstored.root);
    }

    #[test]
    fn diff_tracks_adds_updates_deletes() {
        let mapping = bulk_keys(30);
        let store = storage();
        let mut before = tree_with(store.clone(), &mapping);
        let mut after = before.clone();

        let keys: Vec<&String> = mapping.keys().collect();
        let updated_key = keys[3].clone();
        let deleted_key = keys[7].clone();
        let added_key = "com.example.record/aaaaaaaaaaaaa".to_string();

        after = after.add(&added_key, random_cid(500), None).unwrap();
        after = after.update(&updated_key, random_cid(501)).unwrap();
        after = after.delete(&deleted_key).unwrap();

        let diff = DataDiff::of(&mut after, Some(&mut before)).unwrap();
        assert_eq!(diff.adds.len(), 1);
        assert_eq!(diff.updates.len(), 1);
        assert_eq!(diff.deletes.len(), 1);
        assert!(diff.adds.contains_key(&added_key));
        assert!(diff.updates.contains_key(&updated_key));
        assert!(diff.deletes.contains_key(&deleted_key));
        assert_eq!(diff.updates[&updated_key].cid, random_cid(501));
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let mapping = bulk_keys(20);
        let store = storage();
        let mut a = tree_with(store.clone(), &mapping);
        let mut b = tree_with(store, &mapping);
        let diff = DataDiff::of(&mut a, Some(&mut b)).unwrap();
        assert!(diff.adds.is_empty());
        assert!(diff.updates.is_empty());
        assert!(diff.deletes.is_empty());
        assert_eq!(diff.new_mst_blocks.size(), 0);
    }

    #[test]
    fn node_data_round_trips_via_codec() {
        let mapping = bulk_keys(40);
        let store = storage();
        let mut mst = tree_with(store.clone(), &mapping);
        let serialized = mst.serialize().unwrap();
        let decoded: NodeData = cbor::cbor_to_struct(&serialized.bytes).unwrap();
        let entries = deserialize_node_data(store, &decoded).unwrap();
        let layer = mst.get_layer().unwrap();
        assert_eq!(cid_for_entries(&entries, layer).unwrap(), serialized.cid);
    }

    #[test]
    fn rejects_invalid_keys() {
        let mut mst = Mst::create(storage(), None, None).unwrap();
        let cid = random_cid(0);
        for key in [
            "",
            "no-collection",
            "coll/",
            "/rkey",
            "coll/rkey/extra",
            "coll/bad key",
        ] {
            assert!(mst.add(key, cid, None).is_err(), "{key:?}");
        }
    }
}
