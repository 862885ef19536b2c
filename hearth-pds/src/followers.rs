use crate::content::Author;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowerEntry {
    pub did: String,
    pub handle: String,
    pub uri: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// Accounts following this node, keyed by DID.
pub struct FollowerStore {
    tree: sled::Tree,
}

impl FollowerStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(FollowerStore {
            tree: db.open_tree("followers")?,
        })
    }

    /// Returns `false` when the author already follows us.
    pub fn add(&self, author: &Author, uri: Option<&str>) -> Result<bool> {
        if self.tree.contains_key(author.did.as_bytes())? {
            return Ok(false);
        }
        let entry = FollowerEntry {
            did: author.did.clone(),
            handle: author.handle.clone(),
            uri: uri.map(|u| u.to_string()),
            created_at: hearth_common::now(),
        };
        self.tree
            .insert(author.did.as_bytes(), serde_json::to_vec(&entry)?)?;
        Ok(true)
    }

    pub fn remove(&self, did: &str) -> Result<bool> {
        Ok(self.tree.remove(did.as_bytes())?.is_some())
    }

    pub fn get(&self, did: &str) -> Result<Option<FollowerEntry>> {
        match self.tree.get(did.as_bytes())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    pub fn list(&self) -> Result<Vec<FollowerEntry>> {
        self.tree
            .iter()
            .map(|item| {
                let (_, bytes) = item?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tree.len()
    }
}
