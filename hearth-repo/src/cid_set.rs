use lexicon_cid::Cid;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CidSet {
    set: BTreeSet<Cid>,
}

impl CidSet {
    pub fn new(arr: Option<Vec<Cid>>) -> Self {
        CidSet {
            set: arr.unwrap_or_default().into_iter().collect(),
        }
    }

    pub fn add(&mut self, cid: Cid) {
        self.set.insert(cid);
    }

    pub fn add_set(&mut self, to_merge: CidSet) {
        self.set.extend(to_merge.set);
    }

    pub fn delete(&mut self, cid: &Cid) {
        self.set.remove(cid);
    }

    pub fn has(&self, cid: &Cid) -> bool {
        self.set.contains(cid)
    }

    pub fn size(&self) -> usize {
        self.set.len()
    }

    pub fn to_list(&self) -> Vec<Cid> {
        self.set.iter().copied().collect()
    }
}
