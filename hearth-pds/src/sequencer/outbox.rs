use crate::sequencer::events::SeqEvt;
use crate::sequencer::Sequencer;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("ConsumerTooSlow: stream consumer too slow")]
    ConsumerTooSlow,
}

/// Per-subscriber event source. Subscribes to live events *before* the
/// replay snapshot is taken, then dedupes the overlap by sequence number,
/// so the cutover from backfill to live never drops or repeats an event.
pub struct Outbox {
    backfill: VecDeque<SeqEvt>,
    rx: broadcast::Receiver<SeqEvt>,
    pub last_seen: i64,
}

impl Outbox {
    pub fn new(sequencer: &Sequencer, cursor: Option<i64>) -> Self {
        let rx = sequencer.subscribe();
        let (backfill, last_seen) = match cursor {
            Some(cursor) => (VecDeque::from(sequencer.events_after(cursor)), cursor),
            // no cursor: live tail only
            None => (VecDeque::new(), sequencer.current_seq()),
        };
        Outbox {
            backfill,
            rx,
            last_seen,
        }
    }

    /// Next event in strict seq order: backfill first, then live. `None`
    /// when the node shuts down.
    pub async fn next(&mut self) -> Result<Option<SeqEvt>, OutboxError> {
        if let Some(evt) = self.backfill.pop_front() {
            self.last_seen = evt.seq();
            return Ok(Some(evt));
        }
        loop {
            match self.rx.recv().await {
                Ok(evt) if evt.seq() > self.last_seen => {
                    self.last_seen = evt.seq();
                    return Ok(Some(evt));
                }
                // replayed during backfill
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    return Err(OutboxError::ConsumerTooSlow)
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer(capacity: usize) -> (Sequencer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (Sequencer::new(&db, capacity).unwrap(), dir)
    }

    #[tokio::test]
    async fn replays_then_goes_live_in_order() {
        let (mut seq, _dir) = sequencer(100);
        for _ in 0..5 {
            seq.sequence_identity_evt("did:web:x", None).unwrap();
        }
        let mut outbox = Outbox::new(&seq, Some(2));
        for _ in 0..2 {
            seq.sequence_identity_evt("did:web:x", None).unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(outbox.next().await.unwrap().unwrap().seq());
        }
        assert_eq!(seen, vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn without_cursor_only_new_events_arrive() {
        let (mut seq, _dir) = sequencer(100);
        seq.sequence_identity_evt("did:web:x", None).unwrap();
        let mut outbox = Outbox::new(&seq, None);
        seq.sequence_identity_evt("did:web:x", None).unwrap();
        assert_eq!(outbox.next().await.unwrap().unwrap().seq(), 2);
    }

    #[tokio::test]
    async fn cutover_from_backfill_to_live_is_gapless() {
        let (mut seq, _dir) = sequencer(100);
        seq.sequence_identity_evt("did:web:x", None).unwrap();
        let mut outbox = Outbox::new(&seq, Some(0));
        seq.sequence_identity_evt("did:web:x", None).unwrap();
        assert_eq!(outbox.next().await.unwrap().unwrap().seq(), 1);
        assert_eq!(outbox.next().await.unwrap().unwrap().seq(), 2);
        seq.sequence_identity_evt("did:web:x", None).unwrap();
        assert_eq!(outbox.next().await.unwrap().unwrap().seq(), 3);
    }
}
