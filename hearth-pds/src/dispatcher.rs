//! Classifies records arriving from other repositories and routes them onto
//! the host application's interaction model. Unknown types are dropped, not
//! errors: the network is full of records this node has no use for.

use crate::content::{Author, ContentSource, Reply};
use crate::followers::FollowerStore;
use anyhow::Result;
use hearth_syntax::AtUri;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    #[allow(dead_code)]
    pub cid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LikeRecord {
    pub subject: StrongRef,
}

#[derive(Debug, Deserialize)]
pub struct RepostRecord {
    pub subject: StrongRef,
}

#[derive(Debug, Deserialize)]
pub struct FollowRecord {
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: Option<StrongRef>,
}

#[derive(Debug, Deserialize)]
pub struct PostRecord {
    pub text: Option<String>,
    pub reply: Option<ReplyRef>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "$type")]
pub enum IncomingRecord {
    #[serde(rename = "app.bsky.feed.like")]
    Like(LikeRecord),
    #[serde(rename = "app.bsky.feed.repost")]
    Repost(RepostRecord),
    #[serde(rename = "app.bsky.graph.follow")]
    Follow(FollowRecord),
    #[serde(rename = "app.bsky.feed.post")]
    Post(PostRecord),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Liked,
    Reposted,
    Followed,
    ReplyStored,
    Unliked,
    Unreposted,
    Unfollowed,
    /// Already applied, wrong target, or a type we don't handle.
    Ignored,
}

pub struct Dispatcher {
    local_did: String,
    content: Arc<dyn ContentSource>,
    followers: Arc<FollowerStore>,
}

impl Dispatcher {
    pub fn new(
        local_did: String,
        content: Arc<dyn ContentSource>,
        followers: Arc<FollowerStore>,
    ) -> Self {
        Dispatcher {
            local_did,
            content,
            followers,
        }
    }

    /// The rkey of a subject URI, but only when it points at a record of
    /// ours in the given collection.
    fn local_rkey(&self, uri: &str, collection: &str) -> Option<String> {
        let parsed = AtUri::new(uri).ok()?;
        if parsed.get_hostname() != self.local_did || parsed.get_collection() != collection {
            return None;
        }
        Some(parsed.get_rkey().to_string())
    }

    #[tracing::instrument(skip_all, fields(author = %author.did))]
    pub fn dispatch(
        &self,
        record: &Value,
        author: &Author,
        record_uri: Option<&str>,
    ) -> Result<DispatchOutcome> {
        let incoming: IncomingRecord = match serde_json::from_value(record.clone()) {
            Ok(incoming) => incoming,
            Err(err) => {
                tracing::debug!("unparseable incoming record: {err}");
                return Ok(DispatchOutcome::Ignored);
            }
        };
        match incoming {
            IncomingRecord::Like(like) => {
                let Some(rkey) = self.local_rkey(&like.subject.uri, "app.bsky.feed.post") else {
                    return Ok(DispatchOutcome::Ignored);
                };
                if self.content.add_like(&rkey, author)? {
                    Ok(DispatchOutcome::Liked)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            IncomingRecord::Repost(repost) => {
                let Some(rkey) = self.local_rkey(&repost.subject.uri, "app.bsky.feed.post") else {
                    return Ok(DispatchOutcome::Ignored);
                };
                if self.content.add_repost(&rkey, author)? {
                    Ok(DispatchOutcome::Reposted)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            IncomingRecord::Follow(follow) => {
                if follow.subject != self.local_did {
                    return Ok(DispatchOutcome::Ignored);
                }
                if self.followers.add(author, record_uri)? {
                    Ok(DispatchOutcome::Followed)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            IncomingRecord::Post(post) => {
                let Some(reply) = post.reply else {
                    return Ok(DispatchOutcome::Ignored);
                };
                let Some(root_rkey) = self.local_rkey(&reply.root.uri, "app.bsky.feed.post")
                else {
                    return Ok(DispatchOutcome::Ignored);
                };
                if self.content.get_item(&root_rkey)?.is_none() {
                    return Ok(DispatchOutcome::Ignored);
                }
                let parent_rkey = reply
                    .parent
                    .and_then(|p| self.local_rkey(&p.uri, "app.bsky.feed.post"));
                // remote timestamps are untrusted; unparseable ones become
                // receipt time
                let created_at = post
                    .created_at
                    .filter(|t| hearth_common::time::from_str_to_micros(t).is_ok())
                    .unwrap_or_else(hearth_common::now);
                let stored = self.content.store_reply(Reply {
                    root_rkey,
                    parent_rkey,
                    author: author.clone(),
                    text: post.text.unwrap_or_default(),
                    created_at,
                })?;
                if stored {
                    Ok(DispatchOutcome::ReplyStored)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            IncomingRecord::Other => Ok(DispatchOutcome::Ignored),
        }
    }

    /// The delete side of the record types above.
    #[tracing::instrument(skip_all, fields(author = %author.did))]
    pub fn dispatch_undo(&self, record: &Value, author: &Author) -> Result<DispatchOutcome> {
        let incoming: IncomingRecord = match serde_json::from_value(record.clone()) {
            Ok(incoming) => incoming,
            Err(_) => return Ok(DispatchOutcome::Ignored),
        };
        match incoming {
            IncomingRecord::Like(like) => {
                let Some(rkey) = self.local_rkey(&like.subject.uri, "app.bsky.feed.post") else {
                    return Ok(DispatchOutcome::Ignored);
                };
                if self.content.remove_like(&rkey, author)? {
                    Ok(DispatchOutcome::Unliked)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            IncomingRecord::Repost(repost) => {
                let Some(rkey) = self.local_rkey(&repost.subject.uri, "app.bsky.feed.post") else {
                    return Ok(DispatchOutcome::Ignored);
                };
                if self.content.remove_repost(&rkey, author)? {
                    Ok(DispatchOutcome::Unreposted)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            IncomingRecord::Follow(follow) => {
                if follow.subject != self.local_did {
                    return Ok(DispatchOutcome::Ignored);
                }
                if self.followers.remove(&author.did)? {
                    Ok(DispatchOutcome::Unfollowed)
                } else {
                    Ok(DispatchOutcome::Ignored)
                }
            }
            _ => Ok(DispatchOutcome::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentItem, ContentStatus, MemoryContentSource};
    use serde_json::json;

    const LOCAL_DID: &str = "did:web:pds.example.com";
    const RKEY: &str = "3jui7kd54zh2y";

    fn fixture() -> (Dispatcher, Arc<MemoryContentSource>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let content = Arc::new(MemoryContentSource::new());
        content.insert_item(ContentItem {
            rkey: RKEY.to_string(),
            text: "hello world".to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            status: ContentStatus::Published,
        });
        let followers = Arc::new(FollowerStore::open(&db).unwrap());
        let dispatcher = Dispatcher::new(LOCAL_DID.to_string(), content.clone(), followers);
        (dispatcher, content, dir)
    }

    fn alice() -> Author {
        Author {
            did: "did:web:alice.example".to_string(),
            handle: "alice.example".to_string(),
        }
    }

    #[test]
    fn routes_likes_to_the_interaction_sink() {
        let (dispatcher, content, _dir) = fixture();
        let like = json!({
            "$type": "app.bsky.feed.like",
            "subject": {"uri": format!("at://{LOCAL_DID}/app.bsky.feed.post/{RKEY}")},
        });
        assert_eq!(
            dispatcher.dispatch(&like, &alice(), None).unwrap(),
            DispatchOutcome::Liked
        );
        // repeat delivery is a no-op
        assert_eq!(
            dispatcher.dispatch(&like, &alice(), None).unwrap(),
            DispatchOutcome::Ignored
        );
        assert_eq!(content.like_count(RKEY), 1);

        assert_eq!(
            dispatcher.dispatch_undo(&like, &alice()).unwrap(),
            DispatchOutcome::Unliked
        );
        assert_eq!(content.like_count(RKEY), 0);
    }

    #[test]
    fn ignores_likes_for_foreign_targets() {
        let (dispatcher, content, _dir) = fixture();
        let like = json!({
            "$type": "app.bsky.feed.like",
            "subject": {"uri": "at://did:web:other.example/app.bsky.feed.post/3jabcabcabcab"},
        });
        assert_eq!(
            dispatcher.dispatch(&like, &alice(), None).unwrap(),
            DispatchOutcome::Ignored
        );
        assert_eq!(content.like_count(RKEY), 0);
    }

    #[test]
    fn follow_of_our_did_adds_a_follower() {
        let (dispatcher, _content, _dir) = fixture();
        let follow = json!({
            "$type": "app.bsky.graph.follow",
            "subject": LOCAL_DID,
        });
        let uri = format!("at://{}/app.bsky.graph.follow/3jfollowfollo", alice().did);
        assert_eq!(
            dispatcher.dispatch(&follow, &alice(), Some(&uri)).unwrap(),
            DispatchOutcome::Followed
        );
        assert_eq!(
            dispatcher.dispatch(&follow, &alice(), Some(&uri)).unwrap(),
            DispatchOutcome::Ignored
        );
        assert_eq!(
            dispatcher.dispatch_undo(&follow, &alice()).unwrap(),
            DispatchOutcome::Unfollowed
        );
    }

    #[test]
    fn follow_of_other_did_is_ignored() {
        let (dispatcher, _content, _dir) = fixture();
        let follow = json!({
            "$type": "app.bsky.graph.follow",
            "subject": "did:web:someone.else",
        });
        assert_eq!(
            dispatcher.dispatch(&follow, &alice(), None).unwrap(),
            DispatchOutcome::Ignored
        );
    }

    #[test]
    fn reply_to_local_post_is_stored() {
        let (dispatcher, content, _dir) = fixture();
        let reply = json!({
            "$type": "app.bsky.feed.post",
            "text": "great point",
            "createdAt": "2024-02-02T00:00:00.000Z",
            "reply": {
                "root": {"uri": format!("at://{LOCAL_DID}/app.bsky.feed.post/{RKEY}")},
                "parent": {"uri": format!("at://{LOCAL_DID}/app.bsky.feed.post/{RKEY}")},
            },
        });
        assert_eq!(
            dispatcher.dispatch(&reply, &alice(), None).unwrap(),
            DispatchOutcome::ReplyStored
        );
        let stored = content.replies();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].root_rkey, RKEY);
        assert_eq!(stored[0].parent_rkey.as_deref(), Some(RKEY));
        assert_eq!(stored[0].text, "great point");
    }

    #[test]
    fn non_reply_posts_and_unknown_types_are_ignored() {
        let (dispatcher, _content, _dir) = fixture();
        let post = json!({"$type": "app.bsky.feed.post", "text": "standalone"});
        assert_eq!(
            dispatcher.dispatch(&post, &alice(), None).unwrap(),
            DispatchOutcome::Ignored
        );
        let unknown = json!({"$type": "com.example.custom", "field": 1});
        assert_eq!(
            dispatcher.dispatch(&unknown, &alice(), None).unwrap(),
            DispatchOutcome::Ignored
        );
    }
}
