use crate::cbor;
use crate::cid::cid_for_cbor_bytes;
use crate::types::CidAndBytes;
use anyhow::Result;
use lexicon_cid::Cid;
use serde::Serialize;
use std::collections::BTreeMap;

/// CID-keyed block buffer. Iteration order is CID order, which keeps every
/// derived artifact (CAR bodies in particular) deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockMap {
    map: BTreeMap<Cid, Vec<u8>>,
}

impl BlockMap {
    pub fn new() -> Self {
        BlockMap::default()
    }

    /// Canonically encodes `value`, stores it, returns its CID.
    pub fn add<T: Serialize>(&mut self, value: &T) -> Result<Cid> {
        let bytes = cbor::struct_to_cbor(value)?;
        let cid = cid_for_cbor_bytes(&bytes)?;
        self.set(cid, bytes);
        Ok(cid)
    }

    pub fn set(&mut self, cid: Cid, bytes: Vec<u8>) {
        self.map.insert(cid, bytes);
    }

    pub fn get(&self, cid: &Cid) -> Option<&Vec<u8>> {
        self.map.get(cid)
    }

    pub fn delete(&mut self, cid: &Cid) {
        self.map.remove(cid);
    }

    pub fn has(&self, cid: &Cid) -> bool {
        self.map.contains_key(cid)
    }

    pub fn get_many(&self, cids: Vec<Cid>) -> BlocksAndMissing {
        let mut missing: Vec<Cid> = Vec::new();
        let mut blocks = BlockMap::new();
        for cid in cids {
            match self.map.get(&cid) {
                Some(bytes) => blocks.set(cid, bytes.clone()),
                None => missing.push(cid),
            }
        }
        BlocksAndMissing { blocks, missing }
    }

    pub fn add_map(&mut self, to_add: BlockMap) {
        self.map.extend(to_add.map);
    }

    pub fn entries(&self) -> Vec<CidAndBytes> {
        self.map
            .iter()
            .map(|(cid, bytes)| CidAndBytes {
                cid: *cid,
                bytes: bytes.clone(),
            })
            .collect()
    }

    pub fn cids(&self) -> Vec<Cid> {
        self.map.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Cid, &Vec<u8>)> {
        self.map.iter()
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.map.values().map(|bytes| bytes.len()).sum()
    }
}

impl IntoIterator for BlockMap {
    type Item = (Cid, Vec<u8>);
    type IntoIter = std::collections::btree_map::IntoIter<Cid, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

#[derive(Debug)]
pub struct BlocksAndMissing {
    pub blocks: BlockMap,
    pub missing: Vec<Cid>,
}
