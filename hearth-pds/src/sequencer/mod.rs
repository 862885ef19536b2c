pub mod events;
pub mod outbox;

use crate::sequencer::events::{
    format_seq_account_evt, format_seq_commit, format_seq_identity_evt, SeqEvt,
};
use anyhow::Result;
use hearth_repo::types::CommitData;
use std::collections::VecDeque;
use tokio::sync::broadcast;

const SEQ_KEY: &str = "firehose_seq";

/// Event log for the firehose: a persisted monotonic sequence counter, a
/// bounded replay ring and a broadcast channel for live subscribers.
pub struct Sequencer {
    meta: sled::Tree,
    ring: VecDeque<SeqEvt>,
    capacity: usize,
    tx: broadcast::Sender<SeqEvt>,
    last_seq: i64,
}

impl Sequencer {
    pub fn new(db: &sled::Db, capacity: usize) -> Result<Self> {
        let meta = db.open_tree("firehose")?;
        let last_seq = match meta.get(SEQ_KEY)? {
            Some(bytes) => i64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])),
            None => 0,
        };
        let (tx, _) = broadcast::channel(capacity.max(16));
        Ok(Sequencer {
            meta,
            ring: VecDeque::with_capacity(capacity),
            capacity,
            tx,
            last_seq,
        })
    }

    /// Last assigned sequence number; 0 before the first event. Survives
    /// restarts.
    pub fn current_seq(&self) -> i64 {
        self.last_seq
    }

    fn next_seq(&mut self) -> Result<i64> {
        let next = self.last_seq + 1;
        self.meta.insert(SEQ_KEY, &next.to_be_bytes())?;
        self.meta.flush()?;
        self.last_seq = next;
        Ok(next)
    }

    fn emit(&mut self, evt: SeqEvt) {
        if self.ring.len() >= self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(evt.clone());
        // no live subscribers is fine
        let _ = self.tx.send(evt);
    }

    pub fn sequence_commit(&mut self, did: &str, commit_data: &CommitData) -> Result<i64> {
        let seq = self.next_seq()?;
        let evt = format_seq_commit(did, seq, commit_data)?;
        self.emit(SeqEvt::Commit(evt));
        Ok(seq)
    }

    pub fn sequence_identity_evt(&mut self, did: &str, handle: Option<String>) -> Result<i64> {
        let seq = self.next_seq()?;
        let evt = format_seq_identity_evt(did, seq, handle);
        self.emit(SeqEvt::Identity(evt));
        Ok(seq)
    }

    pub fn sequence_account_evt(
        &mut self,
        did: &str,
        active: bool,
        status: Option<String>,
    ) -> Result<i64> {
        let seq = self.next_seq()?;
        let evt = format_seq_account_evt(did, seq, active, status);
        self.emit(SeqEvt::Account(evt));
        Ok(seq)
    }

    /// Buffered events with `seq > cursor`, oldest first. Events that have
    /// fallen out of the ring are gone.
    pub fn events_after(&self, cursor: i64) -> Vec<SeqEvt> {
        self.ring
            .iter()
            .filter(|evt| evt.seq() > cursor)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeqEvt> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer() -> (Sequencer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (Sequencer::new(&db, 4).unwrap(), dir)
    }

    #[test]
    fn seq_starts_at_one_and_increments() {
        let (mut seq, _dir) = sequencer();
        assert_eq!(seq.current_seq(), 0);
        assert_eq!(seq.sequence_identity_evt("did:web:x", None).unwrap(), 1);
        assert_eq!(seq.sequence_identity_evt("did:web:x", None).unwrap(), 2);
        assert_eq!(seq.current_seq(), 2);
    }

    #[test]
    fn seq_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(dir.path()).unwrap();
            let mut seq = Sequencer::new(&db, 4).unwrap();
            seq.sequence_identity_evt("did:web:x", None).unwrap();
            seq.sequence_identity_evt("did:web:x", None).unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let mut seq = Sequencer::new(&db, 4).unwrap();
        assert_eq!(seq.current_seq(), 2);
        assert_eq!(seq.sequence_identity_evt("did:web:x", None).unwrap(), 3);
    }

    #[test]
    fn account_and_identity_events_share_the_sequence() {
        let (mut seq, _dir) = sequencer();
        seq.sequence_identity_evt("did:web:x", Some("x.example".to_string()))
            .unwrap();
        let s = seq
            .sequence_account_evt("did:web:x", false, Some("deactivated".to_string()))
            .unwrap();
        assert_eq!(s, 2);
        let events = seq.events_after(0);
        assert_eq!(events[0].event_type(), "#identity");
        assert_eq!(events[1].event_type(), "#account");
    }

    #[test]
    fn ring_evicts_oldest() {
        let (mut seq, _dir) = sequencer();
        for _ in 0..6 {
            seq.sequence_identity_evt("did:web:x", None).unwrap();
        }
        let replay = seq.events_after(0);
        let seqs: Vec<i64> = replay.iter().map(|e| e.seq()).collect();
        // capacity 4: 1 and 2 were evicted
        assert_eq!(seqs, vec![3, 4, 5, 6]);
        assert_eq!(seq.events_after(5).len(), 1);
        assert!(seq.events_after(6).is_empty());
    }
}
