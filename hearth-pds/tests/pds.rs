use hearth_pds::actor_store::{ActorStore, WriteError};
use hearth_pds::sequencer::events::{CommitEvt, SeqEvt};
use hearth_pds::sequencer::Sequencer;
use hearth_pds::xrpc::stream::{read_frame, OP_MESSAGE};
use hearth_repo::car::read_car_with_root;
use hearth_repo::cbor;
use hearth_repo::types::{RepoRecord, WriteOpAction};
use hearth_repo::util::verify_commit_sig;
use ipld_core::ipld;
use ipld_core::ipld::Ipld;

const DID: &str = "did:web:pds.example.com";

fn post(text: &str) -> RepoRecord {
    let Ipld::Map(map) = ipld!({
        "$type": "app.bsky.feed.post",
        "text": text,
        "createdAt": "2024-01-01T00:00:00.000Z",
    }) else {
        unreachable!()
    };
    map
}

fn fixture() -> (ActorStore, Sequencer, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let store = ActorStore::open(&db, DID, 1_000_000).unwrap();
    let sequencer = Sequencer::new(&db, 1000).unwrap();
    (store, sequencer, dir)
}

#[test]
fn genesis_write_emits_seq_one() {
    let (mut store, mut sequencer, _dir) = fixture();

    let result = store
        .create_record("app.bsky.feed.post", post("hi"), None, None)
        .unwrap();
    let seq = sequencer.sequence_commit(DID, &result.commit).unwrap();
    assert_eq!(seq, 1);

    let rkey = result.uri.rsplit('/').next().unwrap().to_string();
    assert!(result.uri.starts_with(&format!("at://{DID}/app.bsky.feed.post/")));
    assert!(result.cid.to_string().starts_with('b'));

    // read back what we wrote
    let found = store
        .get_record("app.bsky.feed.post", &rkey, None)
        .unwrap()
        .unwrap();
    assert_eq!(found.cid, result.cid);
    assert_eq!(found.value, post("hi"));

    // the firehose saw exactly one commit with one create op
    let events = sequencer.events_after(0);
    assert_eq!(events.len(), 1);
    let SeqEvt::Commit(evt) = &events[0] else {
        panic!("expected commit event");
    };
    assert_eq!(evt.seq, 1);
    assert_eq!(evt.repo, DID);
    assert_eq!(evt.ops.len(), 1);
    assert_eq!(evt.ops[0].action, WriteOpAction::Create);
    assert_eq!(evt.ops[0].path, format!("app.bsky.feed.post/{rkey}"));
    assert_eq!(evt.ops[0].cid, Some(result.cid));

    // the event's CAR slice opens and is rooted at the new commit
    let car = read_car_with_root(&evt.blocks).unwrap();
    assert_eq!(car.root, evt.commit);
    assert!(car.blocks.has(&result.cid));
}

#[test]
fn commit_events_frame_and_decode() {
    let (mut store, mut sequencer, _dir) = fixture();
    let result = store
        .create_record("app.bsky.feed.post", post("framed"), None, None)
        .unwrap();
    sequencer.sequence_commit(DID, &result.commit).unwrap();

    let frame = sequencer.events_after(0)[0].to_frame().unwrap();
    let (header, body) = read_frame(&frame).unwrap();
    assert_eq!(header.op, OP_MESSAGE);
    assert_eq!(header.t.as_deref(), Some("#commit"));
    let evt: CommitEvt = cbor::cbor_to_struct(body).unwrap();
    assert_eq!(evt.seq, 1);
    assert_eq!(evt.ops[0].cid, Some(result.cid));
}

#[test]
fn put_with_identical_bytes_still_emits_update() {
    let (mut store, mut sequencer, _dir) = fixture();
    let created = store
        .create_record("app.bsky.feed.post", post("same"), None, None)
        .unwrap();
    let rkey = created.uri.rsplit('/').next().unwrap().to_string();
    sequencer.sequence_commit(DID, &created.commit).unwrap();

    let put = store
        .put_record("app.bsky.feed.post", &rkey, post("same"), None, None)
        .unwrap();
    sequencer.sequence_commit(DID, &put.commit).unwrap();

    // record cid unchanged, but the chain advanced and an update was emitted
    assert_eq!(put.cid, created.cid);
    let events = sequencer.events_after(1);
    assert_eq!(events.len(), 1);
    let SeqEvt::Commit(evt) = &events[0] else {
        panic!("expected commit event");
    };
    assert_eq!(evt.ops[0].action, WriteOpAction::Update);
    assert_eq!(evt.ops[0].cid, Some(created.cid));
    assert_eq!(evt.since.as_deref(), Some(created.commit.rev.as_str()));
}

#[test]
fn swap_record_conflict_lets_exactly_one_writer_through() {
    let (mut store, _sequencer, _dir) = fixture();
    let created = store
        .create_record("app.bsky.feed.post", post("v1"), None, None)
        .unwrap();
    let rkey = created.uri.rsplit('/').next().unwrap().to_string();
    let c1 = created.cid;

    // client A swaps on C1 and wins
    let a = store
        .put_record("app.bsky.feed.post", &rkey, post("v2"), Some(c1), None)
        .unwrap();
    assert_ne!(a.cid, c1);

    // client B holds a stale C1
    let b = store.put_record("app.bsky.feed.post", &rkey, post("v3"), Some(c1), None);
    match b {
        Err(WriteError::BadRecordSwap(current)) => assert_eq!(current, Some(a.cid)),
        other => panic!("expected BadRecordSwap, got {other:?}"),
    }

    // repository reflects the winner only
    let found = store
        .get_record("app.bsky.feed.post", &rkey, None)
        .unwrap()
        .unwrap();
    assert_eq!(found.value, post("v2"));
}

#[test]
fn swap_commit_mismatch_is_a_no_op() {
    let (mut store, mut sequencer, _dir) = fixture();
    let first = store
        .create_record("app.bsky.feed.post", post("one"), None, None)
        .unwrap();
    sequencer.sequence_commit(DID, &first.commit).unwrap();
    let stale = first.commit.prev.unwrap();

    let before = store.repo().unwrap().cid;
    let result = store.create_record("app.bsky.feed.post", post("two"), None, Some(stale));
    assert!(matches!(result, Err(WriteError::BadCommitSwap(_))));
    // nothing changed and nothing was sequenced
    assert_eq!(store.repo().unwrap().cid, before);
    assert_eq!(sequencer.current_seq(), 1);
}

#[test]
fn create_with_existing_rkey_is_rejected() {
    let (mut store, _sequencer, _dir) = fixture();
    let created = store
        .create_record("app.bsky.feed.post", post("taken"), None, None)
        .unwrap();
    let rkey = created.uri.rsplit('/').next().unwrap().to_string();
    let result = store.create_record("app.bsky.feed.post", post("again"), Some(rkey), None);
    assert!(matches!(result, Err(WriteError::RecordAlreadyExists(_))));
}

#[test]
fn delete_then_list_and_get() {
    let (mut store, mut sequencer, _dir) = fixture();
    let mut rkeys = Vec::new();
    for text in ["r1", "r2", "r3"] {
        let result = store
            .create_record("app.bsky.feed.post", post(text), None, None)
            .unwrap();
        sequencer.sequence_commit(DID, &result.commit).unwrap();
        rkeys.push(result.uri.rsplit('/').next().unwrap().to_string());
    }
    let commit = store
        .delete_record("app.bsky.feed.post", &rkeys[1], None, None)
        .unwrap();
    sequencer.sequence_commit(DID, &commit).unwrap();

    let listed = store
        .list_records("app.bsky.feed.post", 100, None, false)
        .unwrap();
    let listed_keys: Vec<&String> = listed.iter().map(|r| &r.rkey).collect();
    assert_eq!(listed_keys, vec![&rkeys[0], &rkeys[2]]);
    assert!(store
        .get_record("app.bsky.feed.post", &rkeys[1], None)
        .unwrap()
        .is_none());

    // reverse listing flips the order
    let reversed = store
        .list_records("app.bsky.feed.post", 100, None, true)
        .unwrap();
    let reversed_keys: Vec<&String> = reversed.iter().map(|r| &r.rkey).collect();
    assert_eq!(reversed_keys, vec![&rkeys[2], &rkeys[0]]);
}

#[test]
fn exported_car_tracks_live_records_only() {
    let (mut store, _sequencer, _dir) = fixture();
    let kept = store
        .create_record("app.bsky.feed.post", post("kept"), None, None)
        .unwrap();
    let dropped = store
        .create_record("app.bsky.feed.post", post("dropped"), None, None)
        .unwrap();
    let dropped_rkey = dropped.uri.rsplit('/').next().unwrap().to_string();
    store
        .delete_record("app.bsky.feed.post", &dropped_rkey, None, None)
        .unwrap();

    let car = store.export_car(None).unwrap();
    let parsed = read_car_with_root(&car).unwrap();
    assert_eq!(parsed.root, store.repo().unwrap().cid);
    assert!(parsed.blocks.has(&kept.cid));
    assert!(!parsed.blocks.has(&dropped.cid));
}

#[test]
fn commits_stay_signed_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (cid, public_key) = {
        let db = sled::open(dir.path()).unwrap();
        let mut store = ActorStore::open(&db, DID, 1_000_000).unwrap();
        let result = store
            .create_record("app.bsky.feed.post", post("durable"), None, None)
            .unwrap();
        (result.cid, store.keypair().public_compressed())
    };
    let db = sled::open(dir.path()).unwrap();
    let store = ActorStore::open(&db, DID, 1_000_000).unwrap();
    // same key, same root, record still present and commit still verifies
    assert_eq!(store.keypair().public_compressed(), public_key);
    let repo = store.repo().unwrap();
    assert!(verify_commit_sig(&repo.commit, &public_key).unwrap());
    let listed = store
        .list_records("app.bsky.feed.post", 10, None, false)
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].cid, cid);
}

#[test]
fn record_type_must_match_collection() {
    let (mut store, _sequencer, _dir) = fixture();
    let result = store.create_record("app.bsky.feed.like", post("wrong type"), None, None);
    assert!(matches!(result, Err(WriteError::InvalidRecord(_))));
    let result = store.create_record("not-an-nsid", post("bad collection"), None, None);
    assert!(matches!(result, Err(WriteError::UnsupportedCollection(_))));
}

#[test]
fn blob_store_round_trip_and_cap() {
    let (store, _sequencer, _dir) = fixture();
    let blob = store.blob.put(b"png bytes", "image/png").unwrap();
    assert_eq!(blob.size, 9);
    let found = store.blob.get(&blob.cid).unwrap().unwrap();
    assert_eq!(found.bytes, b"png bytes");
    assert_eq!(found.mime_type, "image/png");
    assert!(store.blob.exists(&blob.cid).unwrap());

    let listed = store.blob.list(10, None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].cid, blob.cid);

    assert!(store.blob.delete(&blob.cid).unwrap());
    assert!(!store.blob.exists(&blob.cid).unwrap());

    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    let small = ActorStore::open(&db, DID, 8).unwrap();
    assert!(small.blob.put(b"way too big", "text/plain").is_err());
}
