use hearth_common::tid::Ticker;
use hearth_crypto::Keypair;
use hearth_repo::car::read_car_with_root;
use hearth_repo::cbor;
use hearth_repo::cid::verify_cid;
use hearth_repo::repo::Repo;
use hearth_repo::storage::{MemoryBlockstore, RepoStorage};
use hearth_repo::types::{
    Commit, RecordCreateOrUpdateOp, RecordDeleteOp, RecordWriteOp, RepoRecord, WriteOpAction,
};
use hearth_repo::util::verify_commit_sig;
use ipld_core::ipld;
use ipld_core::ipld::Ipld;
use std::sync::Arc;

const DID: &str = "did:web:pds.example.com";

fn post_record(text: &str) -> RepoRecord {
    let Ipld::Map(map) = ipld!({
        "$type": "app.bsky.feed.post",
        "text": text,
        "createdAt": "2024-01-01T00:00:00.000Z",
    }) else {
        unreachable!()
    };
    map
}

fn new_repo() -> (Repo, Keypair, Ticker) {
    let storage: Arc<dyn RepoStorage> = Arc::new(MemoryBlockstore::new(None));
    let keypair = Keypair::generate();
    let mut ticker = Ticker::new();
    let repo = Repo::create(storage, DID, &keypair, &mut ticker).unwrap();
    (repo, keypair, ticker)
}

#[test]
fn genesis_commit_is_signed_and_loadable() {
    let (repo, keypair, _) = new_repo();
    assert_eq!(repo.did(), DID);
    assert_eq!(repo.version(), 3);
    assert_eq!(repo.commit.prev, None);
    assert!(verify_commit_sig(&repo.commit, &keypair.public_compressed()).unwrap());

    let reloaded = Repo::load(repo.storage.clone(), None).unwrap();
    assert_eq!(reloaded.cid, repo.cid);
    assert_eq!(reloaded.rev(), repo.rev());
}

#[test]
fn create_get_and_list_records() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let rkey = ticker.next(None).to_string();
    let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: rkey.clone(),
        record: post_record("hi"),
    })];
    let mut repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();

    let fetched = repo.get_record("app.bsky.feed.post", &rkey).unwrap().unwrap();
    assert_eq!(fetched, post_record("hi"));

    let listed = repo.list_records("app.bsky.feed.post", 100, None, false).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].rkey, rkey);
    assert_eq!(repo.collections().unwrap(), vec!["app.bsky.feed.post"]);
}

#[test]
fn commit_chain_links_prev_and_advances_rev() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let genesis_cid = repo.cid;
    let genesis_rev = repo.rev().to_string();

    let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: ticker.next(None).to_string(),
        record: post_record("first"),
    })];
    let repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();

    assert_eq!(repo.commit.prev, Some(genesis_cid));
    assert!(repo.rev() > genesis_rev.as_str());
    assert!(verify_commit_sig(&repo.commit, &keypair.public_compressed()).unwrap());
}

#[test]
fn ops_reflect_the_writes() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let rkey = ticker.next(None).to_string();
    let create = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: rkey.clone(),
        record: post_record("hello"),
    })];
    let commit = repo.format_commit(&create, &keypair, &mut ticker).unwrap();
    assert_eq!(commit.ops.len(), 1);
    assert_eq!(commit.ops[0].action, WriteOpAction::Create);
    assert_eq!(commit.ops[0].path, format!("app.bsky.feed.post/{rkey}"));
    assert!(commit.ops[0].cid.is_some());
    let mut repo = repo.apply_commit(commit).unwrap();

    let delete = vec![RecordWriteOp::Delete(RecordDeleteOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: rkey.clone(),
    })];
    let commit = repo.format_commit(&delete, &keypair, &mut ticker).unwrap();
    assert_eq!(commit.ops[0].action, WriteOpAction::Delete);
    assert_eq!(commit.ops[0].cid, None);
}

#[test]
fn delete_then_list_skips_removed_record() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let mut rkeys: Vec<String> = Vec::new();
    for text in ["r1", "r2", "r3"] {
        let rkey = ticker.next(None).to_string();
        rkeys.push(rkey.clone());
        let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
            collection: "app.bsky.feed.post".to_string(),
            rkey,
            record: post_record(text),
        })];
        repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();
    }
    let deletes = vec![RecordWriteOp::Delete(RecordDeleteOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: rkeys[1].clone(),
    })];
    let mut repo = repo.apply_writes(&deletes, &keypair, &mut ticker).unwrap();

    let listed = repo.list_records("app.bsky.feed.post", 100, None, false).unwrap();
    let listed_keys: Vec<&String> = listed.iter().map(|r| &r.rkey).collect();
    assert_eq!(listed_keys, vec![&rkeys[0], &rkeys[2]]);
    assert_eq!(repo.get_record("app.bsky.feed.post", &rkeys[1]).unwrap(), None);
}

#[test]
fn exported_car_recovers_commit_tree_and_records() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let mut rkeys: Vec<String> = Vec::new();
    for text in ["r1", "r2", "r3"] {
        let rkey = ticker.next(None).to_string();
        rkeys.push(rkey.clone());
        let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
            collection: "app.bsky.feed.post".to_string(),
            rkey,
            record: post_record(text),
        })];
        repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();
    }

    let car = repo.export_car(None).unwrap();
    let parsed = read_car_with_root(&car).unwrap();

    // declared root is the current commit and every block re-hashes to its CID
    assert_eq!(parsed.root, repo.cid);
    for entry in parsed.blocks.entries() {
        assert!(verify_cid(&entry.cid, &entry.bytes));
    }

    // the root resolves through the MST to the record leaves
    let commit_bytes = parsed.blocks.get(&repo.cid).unwrap();
    let commit: Commit = cbor::cbor_to_struct(commit_bytes).unwrap();
    assert_eq!(commit.data, repo.data.get_pointer().unwrap());
    for rkey in &rkeys {
        let cid = repo.get_record_cid("app.bsky.feed.post", rkey).unwrap().unwrap();
        let record_bytes = parsed.blocks.get(&cid).expect("record block in CAR");
        let record = hearth_repo::util::parse_record(record_bytes).unwrap();
        assert_eq!(record.get("$type"), Some(&Ipld::String("app.bsky.feed.post".into())));
    }
}

#[test]
fn incremental_car_contains_only_the_delta() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let first_rkey = ticker.next(None).to_string();
    let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: first_rkey.clone(),
        record: post_record("old"),
    })];
    let mut repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();
    let since = repo.rev().to_string();

    let second_rkey = ticker.next(None).to_string();
    let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: second_rkey.clone(),
        record: post_record("new"),
    })];
    let mut repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();

    let car = repo.export_car(Some(&since)).unwrap();
    let parsed = read_car_with_root(&car).unwrap();
    assert_eq!(parsed.root, repo.cid);

    let new_cid = repo.get_record_cid("app.bsky.feed.post", &second_rkey).unwrap().unwrap();
    let old_cid = repo.get_record_cid("app.bsky.feed.post", &first_rkey).unwrap().unwrap();
    assert!(parsed.blocks.has(&new_cid));
    assert!(!parsed.blocks.has(&old_cid));
}

#[test]
fn put_with_same_bytes_keeps_record_cid() {
    let (mut repo, keypair, mut ticker) = new_repo();
    let rkey = ticker.next(None).to_string();
    let writes = vec![RecordWriteOp::Create(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: rkey.clone(),
        record: post_record("same"),
    })];
    let mut repo = repo.apply_writes(&writes, &keypair, &mut ticker).unwrap();
    let cid_before = repo.get_record_cid("app.bsky.feed.post", &rkey).unwrap();

    let update = vec![RecordWriteOp::Update(RecordCreateOrUpdateOp {
        collection: "app.bsky.feed.post".to_string(),
        rkey: rkey.clone(),
        record: post_record("same"),
    })];
    let mut repo = repo.apply_writes(&update, &keypair, &mut ticker).unwrap();
    assert_eq!(repo.get_record_cid("app.bsky.feed.post", &rkey).unwrap(), cid_before);
}
