use crate::data_diff::DataDiff;
use crate::mst::walker::{MstWalker, WalkerStatus};
use crate::mst::{Mst, NodeEntry};
use anyhow::{bail, Result};

/// Diff against nothing: every node and leaf is an add.
pub fn null_diff(tree: &mut Mst) -> Result<DataDiff> {
    let mut diff = DataDiff::new();
    add_tree(&mut diff, tree)?;
    Ok(diff)
}

fn add_tree(diff: &mut DataDiff, tree: &mut Mst) -> Result<()> {
    diff.node_add(NodeEntry::Mst(tree.clone()))?;
    for entry in tree.get_entries()? {
        match entry {
            NodeEntry::Leaf(_) => diff.node_add(entry)?,
            NodeEntry::Mst(mut sub) => add_tree(diff, &mut sub)?,
        }
    }
    Ok(())
}

/// Walks both trees in lockstep, descending only into subtrees whose
/// pointers differ.
pub fn mst_diff(curr: &mut Mst, prev: Option<&mut Mst>) -> Result<DataDiff> {
    curr.get_pointer()?;
    let Some(prev) = prev else {
        return null_diff(curr);
    };
    prev.get_pointer()?;

    let mut diff = DataDiff::new();
    let mut left_walker = MstWalker::new(prev.clone());
    let mut right_walker = MstWalker::new(curr.clone());
    while !left_walker.is_done() || !right_walker.is_done() {
        // one side exhausted: log the rest of the other side
        match (&left_walker.status, &right_walker.status) {
            (WalkerStatus::Done, WalkerStatus::Progress(r)) => {
                diff.node_add(r.curr.clone())?;
                right_walker.advance()?;
                continue;
            }
            (WalkerStatus::Progress(l), WalkerStatus::Done) => {
                diff.node_delete(l.curr.clone())?;
                left_walker.advance()?;
                continue;
            }
            (WalkerStatus::Done, WalkerStatus::Done) => break,
            _ => (),
        }
        let (left, right) = match (&left_walker.status, &right_walker.status) {
            (WalkerStatus::Progress(l), WalkerStatus::Progress(r)) => {
                (l.curr.clone(), r.curr.clone())
            }
            _ => break,
        };

        // both leaves: update or advance the lower key
        if let (NodeEntry::Leaf(left_leaf), NodeEntry::Leaf(right_leaf)) = (&left, &right) {
            if left_leaf.key == right_leaf.key {
                if left_leaf.value != right_leaf.value {
                    diff.leaf_update(&left_leaf.key, left_leaf.value, right_leaf.value);
                }
                left_walker.advance()?;
                right_walker.advance()?;
            } else if left_leaf.key < right_leaf.key {
                diff.leaf_delete(&left_leaf.key, left_leaf.value);
                left_walker.advance()?;
            } else {
                diff.leaf_add(&right_leaf.key, right_leaf.value);
                right_walker.advance()?;
            }
            continue;
        }

        // unequal layers: step the higher walker into its tree, or advance
        // the lower one past its leaf, until the layers line up
        if left_walker.layer()? > right_walker.layer()? {
            if left.is_leaf() {
                diff.node_add(right)?;
                right_walker.advance()?;
            } else {
                diff.node_delete(left)?;
                left_walker.step_into()?;
            }
            continue;
        } else if left_walker.layer()? < right_walker.layer()? {
            if right.is_leaf() {
                diff.node_delete(left)?;
                left_walker.advance()?;
            } else {
                diff.node_add(right)?;
                right_walker.step_into()?;
            }
            continue;
        }

        // same layer, both trees: equal pointers step over, unequal step in
        if let (NodeEntry::Mst(left_tree), NodeEntry::Mst(right_tree)) = (&left, &right) {
            let mut left_tree = left_tree.clone();
            let mut right_tree = right_tree.clone();
            if left_tree.get_pointer()? == right_tree.get_pointer()? {
                left_walker.step_over()?;
                right_walker.step_over()?;
            } else {
                diff.node_add(NodeEntry::Mst(right_tree))?;
                diff.node_delete(NodeEntry::Mst(left_tree))?;
                left_walker.step_into()?;
                right_walker.step_into()?;
            }
            continue;
        }

        // tree on one side, leaf on the other: step into the tree
        match (&left, &right) {
            (NodeEntry::Leaf(_), NodeEntry::Mst(_)) => {
                diff.node_add(right)?;
                right_walker.step_into()?;
            }
            (NodeEntry::Mst(_), NodeEntry::Leaf(_)) => {
                diff.node_delete(left)?;
                left_walker.step_into()?;
            }
            _ => bail!("Unidentifiable case in diff walk"),
        }
    }
    Ok(diff)
}
