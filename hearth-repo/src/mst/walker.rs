use crate::mst::{Mst, NodeEntry};
use anyhow::{bail, Result};

#[derive(Clone)]
pub struct WalkerProgress {
    pub curr: NodeEntry,
    /// The node whose entries we are walking; `None` while `curr` is the
    /// tree root itself.
    pub walking: Option<Mst>,
    pub index: usize,
}

#[derive(Clone)]
pub enum WalkerStatus {
    Done,
    Progress(WalkerProgress),
}

/// Cursor over one tree, advanced entry by entry. Two of these walk the old
/// and new roots in lockstep to compute a diff.
pub struct MstWalker {
    pub stack: Vec<WalkerProgress>,
    pub status: WalkerStatus,
}

impl MstWalker {
    pub fn new(root: Mst) -> Self {
        MstWalker {
            stack: Vec::new(),
            status: WalkerStatus::Progress(WalkerProgress {
                curr: NodeEntry::Mst(root),
                walking: None,
                index: 0,
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.status, WalkerStatus::Done)
    }

    /// Layer of the node that contains the current entry.
    pub fn layer(&mut self) -> Result<u32> {
        match self.status {
            WalkerStatus::Done => bail!("Walk is done"),
            WalkerStatus::Progress(ref mut p) => {
                if let Some(ref mut walking) = p.walking {
                    return walking.get_layer();
                }
                // at the root of the tree: its container is one above
                if let NodeEntry::Mst(ref mut mst) = p.curr {
                    return Ok(mst.get_layer()? + 1);
                }
                bail!("Could not identify layer of walk")
            }
        }
    }

    /// Moves to the next entry of the walked node, skipping over whatever
    /// `curr` points at.
    pub fn step_over(&mut self) -> Result<()> {
        match self.status {
            WalkerStatus::Done => Ok(()),
            WalkerStatus::Progress(ref mut p) => {
                match p.walking {
                    Some(ref mut walking) => {
                        let entries = walking.get_entries()?;
                        p.index += 1;
                        match entries.into_iter().nth(p.index) {
                            Some(next) => p.curr = next,
                            None => {
                                match self.stack.pop() {
                                    Some(popped) => {
                                        self.status = WalkerStatus::Progress(popped);
                                        self.step_over()?;
                                    }
                                    None => self.status = WalkerStatus::Done,
                                }
                            }
                        }
                    }
                    // stepping over the root ends the walk
                    None => self.status = WalkerStatus::Done,
                }
                Ok(())
            }
        }
    }

    /// Descends into the subtree `curr` points at.
    pub fn step_into(&mut self) -> Result<()> {
        match self.status {
            WalkerStatus::Done => Ok(()),
            WalkerStatus::Progress(ref mut p) => {
                let NodeEntry::Mst(ref mut mst) = p.curr else {
                    bail!("No tree at pointer, cannot step into");
                };
                let mut mst = mst.clone();
                let entries = mst.get_entries()?;
                match entries.into_iter().next() {
                    None if p.walking.is_none() => {
                        // empty root: nothing to walk
                        self.status = WalkerStatus::Done;
                        Ok(())
                    }
                    None => bail!("Tried to step into a node with 0 entries which is invalid"),
                    Some(next) => {
                        if p.walking.is_some() {
                            self.stack.push(p.clone());
                        }
                        *p = WalkerProgress {
                            curr: next,
                            walking: Some(mst),
                            index: 0,
                        };
                        Ok(())
                    }
                }
            }
        }
    }

    /// Advances to the next entry, descending first if `curr` is a subtree.
    pub fn advance(&mut self) -> Result<()> {
        match self.status {
            WalkerStatus::Done => Ok(()),
            WalkerStatus::Progress(ref p) => {
                if p.curr.is_leaf() {
                    self.step_over()
                } else {
                    self.step_into()
                }
            }
        }
    }
}
