//! Boundary to the host application. The engine treats the host's posts and
//! comments as an opaque content source: it can list items, look them up by
//! record key, and push interaction counts back in. The in-memory
//! implementation backs tests and standalone deployments.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Author {
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentStatus {
    Published,
    Deleted,
}

/// One host item, already keyed by the TID rkey it is (or will be)
/// published under.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub rkey: String,
    pub text: String,
    pub created_at: String,
    pub status: ContentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub root_rkey: String,
    pub parent_rkey: Option<String>,
    pub author: Author,
    pub text: String,
    pub created_at: String,
}

pub trait ContentSource: Send + Sync {
    fn list_items(&self) -> Result<Vec<ContentItem>>;
    fn get_item(&self, rkey: &str) -> Result<Option<ContentItem>>;

    /// Interaction sinks. Return `false` when the call was a no-op (already
    /// applied), so repeat deliveries stay idempotent.
    fn add_like(&self, rkey: &str, author: &Author) -> Result<bool>;
    fn remove_like(&self, rkey: &str, author: &Author) -> Result<bool>;
    fn add_repost(&self, rkey: &str, author: &Author) -> Result<bool>;
    fn remove_repost(&self, rkey: &str, author: &Author) -> Result<bool>;
    fn store_reply(&self, reply: Reply) -> Result<bool>;
}

#[derive(Default)]
struct MemoryContentInner {
    items: HashMap<String, ContentItem>,
    likes: HashMap<String, HashSet<String>>,
    reposts: HashMap<String, HashSet<String>>,
    replies: Vec<Reply>,
}

#[derive(Default)]
pub struct MemoryContentSource {
    inner: Mutex<MemoryContentInner>,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: ContentItem) {
        let mut inner = self.inner.lock().expect("content lock poisoned");
        inner.items.insert(item.rkey.clone(), item);
    }

    pub fn like_count(&self, rkey: &str) -> usize {
        let inner = self.inner.lock().expect("content lock poisoned");
        inner.likes.get(rkey).map(|s| s.len()).unwrap_or(0)
    }

    pub fn repost_count(&self, rkey: &str) -> usize {
        let inner = self.inner.lock().expect("content lock poisoned");
        inner.reposts.get(rkey).map(|s| s.len()).unwrap_or(0)
    }

    pub fn replies(&self) -> Vec<Reply> {
        let inner = self.inner.lock().expect("content lock poisoned");
        inner.replies.clone()
    }
}

impl ContentSource for MemoryContentSource {
    fn list_items(&self) -> Result<Vec<ContentItem>> {
        let inner = self.inner.lock().expect("content lock poisoned");
        let mut items: Vec<ContentItem> = inner.items.values().cloned().collect();
        items.sort_by(|a, b| a.rkey.cmp(&b.rkey));
        Ok(items)
    }

    fn get_item(&self, rkey: &str) -> Result<Option<ContentItem>> {
        let inner = self.inner.lock().expect("content lock poisoned");
        Ok(inner.items.get(rkey).cloned())
    }

    fn add_like(&self, rkey: &str, author: &Author) -> Result<bool> {
        let mut inner = self.inner.lock().expect("content lock poisoned");
        Ok(inner
            .likes
            .entry(rkey.to_string())
            .or_default()
            .insert(author.did.clone()))
    }

    fn remove_like(&self, rkey: &str, author: &Author) -> Result<bool> {
        let mut inner = self.inner.lock().expect("content lock poisoned");
        Ok(inner
            .likes
            .get_mut(rkey)
            .map(|s| s.remove(&author.did))
            .unwrap_or(false))
    }

    fn add_repost(&self, rkey: &str, author: &Author) -> Result<bool> {
        let mut inner = self.inner.lock().expect("content lock poisoned");
        Ok(inner
            .reposts
            .entry(rkey.to_string())
            .or_default()
            .insert(author.did.clone()))
    }

    fn remove_repost(&self, rkey: &str, author: &Author) -> Result<bool> {
        let mut inner = self.inner.lock().expect("content lock poisoned");
        Ok(inner
            .reposts
            .get_mut(rkey)
            .map(|s| s.remove(&author.did))
            .unwrap_or(false))
    }

    fn store_reply(&self, reply: Reply) -> Result<bool> {
        let mut inner = self.inner.lock().expect("content lock poisoned");
        let duplicate = inner.replies.iter().any(|r| {
            r.root_rkey == reply.root_rkey
                && r.author.did == reply.author.did
                && r.text == reply.text
                && r.created_at == reply.created_at
        });
        if duplicate {
            return Ok(false);
        }
        inner.replies.push(reply);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            did: "did:web:alice.example".to_string(),
            handle: "alice.example".to_string(),
        }
    }

    #[test]
    fn likes_are_idempotent_per_author() {
        let content = MemoryContentSource::new();
        assert!(content.add_like("3jui7kd54zh2y", &author()).unwrap());
        assert!(!content.add_like("3jui7kd54zh2y", &author()).unwrap());
        assert_eq!(content.like_count("3jui7kd54zh2y"), 1);
        assert!(content.remove_like("3jui7kd54zh2y", &author()).unwrap());
        assert!(!content.remove_like("3jui7kd54zh2y", &author()).unwrap());
        assert_eq!(content.like_count("3jui7kd54zh2y"), 0);
    }

    #[test]
    fn repeat_replies_are_dropped() {
        let content = MemoryContentSource::new();
        let reply = Reply {
            root_rkey: "3jui7kd54zh2y".to_string(),
            parent_rkey: None,
            author: author(),
            text: "nice post".to_string(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
        };
        assert!(content.store_reply(reply.clone()).unwrap());
        assert!(!content.store_reply(reply).unwrap());
        assert_eq!(content.replies().len(), 1);
    }
}
