//! Promotion of host content into the repository. Items the content source
//! reports as published get `app.bsky.feed.post` records; items it reports
//! deleted get their records removed. Runs at boot and whenever the
//! embedder signals a content change.

use crate::content::{ContentItem, ContentStatus, ContentSource};
use crate::{SharedActorStore, SharedSequencer};
use anyhow::Result;
use hearth_repo::types::RepoRecord;
use ipld_core::ipld::Ipld;

const POST_COLLECTION: &str = "app.bsky.feed.post";

fn post_record(item: &ContentItem) -> RepoRecord {
    let mut record = RepoRecord::new();
    record.insert(
        "$type".to_string(),
        Ipld::String(POST_COLLECTION.to_string()),
    );
    record.insert("text".to_string(), Ipld::String(item.text.clone()));
    record.insert(
        "createdAt".to_string(),
        Ipld::String(item.created_at.clone()),
    );
    record
}

/// Mirrors the content source into the repo. Returns how many records
/// changed.
pub async fn sync_content(
    content: &dyn ContentSource,
    actor_store: &SharedActorStore,
    sequencer: &SharedSequencer,
) -> Result<usize> {
    let items = content.list_items()?;
    let mut changed = 0;
    for item in items {
        let mut store = actor_store.actor_store.write().await;
        let mut lock = sequencer.sequencer.write().await;
        let existing = store.get_record(POST_COLLECTION, &item.rkey, None)?;
        let commit = match (item.status, existing) {
            (ContentStatus::Published, None) => {
                let result = store.create_record(
                    POST_COLLECTION,
                    post_record(&item),
                    Some(item.rkey.clone()),
                    None,
                )?;
                Some(result.commit)
            }
            (ContentStatus::Published, Some(found)) => {
                let record = post_record(&item);
                if found.value == record {
                    None
                } else {
                    let result =
                        store.put_record(POST_COLLECTION, &item.rkey, record, None, None)?;
                    Some(result.commit)
                }
            }
            (ContentStatus::Deleted, Some(_)) => {
                Some(store.delete_record(POST_COLLECTION, &item.rkey, None, None)?)
            }
            (ContentStatus::Deleted, None) => None,
        };
        if let Some(commit) = commit {
            changed += 1;
            if let Err(err) = lock.sequence_commit(&store.did, &commit) {
                tracing::warn!("failed to sequence promoted content: {err}");
            }
        }
    }
    if changed > 0 {
        tracing::info!(changed, "promoted host content into repository");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor_store::ActorStore;
    use crate::content::MemoryContentSource;
    use crate::sequencer::Sequencer;
    use crate::{SharedActorStore, SharedSequencer};
    use tokio::sync::RwLock;

    const DID: &str = "did:web:pds.example.com";

    fn item(rkey: &str, text: &str, status: ContentStatus) -> ContentItem {
        ContentItem {
            rkey: rkey.to_string(),
            text: text.to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn mirrors_published_and_deleted_items() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let content = MemoryContentSource::new();
        content.insert_item(item("3jaaaaaaaaaaa", "first post", ContentStatus::Published));
        content.insert_item(item("3jbbbbbbbbbbb", "second post", ContentStatus::Published));
        let actor_store = SharedActorStore {
            actor_store: RwLock::new(ActorStore::open(&db, DID, 1_000_000).unwrap()),
        };
        let sequencer = SharedSequencer {
            sequencer: RwLock::new(Sequencer::new(&db, 100).unwrap()),
        };

        let changed = sync_content(&content, &actor_store, &sequencer).await.unwrap();
        assert_eq!(changed, 2);
        {
            let store = actor_store.actor_store.read().await;
            let found = store
                .get_record(POST_COLLECTION, "3jaaaaaaaaaaa", None)
                .unwrap()
                .unwrap();
            assert_eq!(
                found.value.get("text"),
                Some(&Ipld::String("first post".to_string()))
            );
        }

        // a second pass with unchanged content is a no-op
        assert_eq!(
            sync_content(&content, &actor_store, &sequencer).await.unwrap(),
            0
        );

        // edits and deletions flow through
        content.insert_item(item("3jaaaaaaaaaaa", "first post, edited", ContentStatus::Published));
        content.insert_item(item("3jbbbbbbbbbbb", "second post", ContentStatus::Deleted));
        let changed = sync_content(&content, &actor_store, &sequencer).await.unwrap();
        assert_eq!(changed, 2);
        let store = actor_store.actor_store.read().await;
        assert!(store
            .get_record(POST_COLLECTION, "3jbbbbbbbbbbb", None)
            .unwrap()
            .is_none());
        let edited = store
            .get_record(POST_COLLECTION, "3jaaaaaaaaaaa", None)
            .unwrap()
            .unwrap();
        assert_eq!(
            edited.value.get("text"),
            Some(&Ipld::String("first post, edited".to_string()))
        );
    }
}
