use anyhow::Result;
use hearth_repo::cid::cid_for_raw;
use hearth_repo::error::BlobError;
use lexicon_cid::Cid;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMeta {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobRef {
    pub cid: Cid,
    pub mime_type: String,
    pub size: usize,
}

pub struct FoundBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub size: usize,
}

/// CID-keyed blob storage: bytes in one tree, `{mimeType, size}` metadata in
/// another, both keyed by the text CID so listing sorts the way cursors
/// paginate.
pub struct SledBlobStore {
    blobs: sled::Tree,
    index: sled::Tree,
    max_blob_size: usize,
}

impl SledBlobStore {
    pub fn open(db: &sled::Db, max_blob_size: usize) -> Result<Self> {
        Ok(SledBlobStore {
            blobs: db.open_tree("blobs")?,
            index: db.open_tree("blob_index")?,
            max_blob_size,
        })
    }

    pub fn put(&self, bytes: &[u8], mime_type: &str) -> Result<BlobRef, BlobError> {
        if bytes.len() > self.max_blob_size {
            return Err(BlobError::BlobTooLarge(bytes.len(), self.max_blob_size));
        }
        let cid = cid_for_raw(bytes).map_err(|_| BlobError::BlobNotFound)?;
        let meta = BlobMeta {
            mime_type: mime_type.to_string(),
            size: bytes.len(),
        };
        let meta_bytes = serde_json::to_vec(&meta).map_err(|_| BlobError::BlobNotFound)?;
        let key = cid.to_string();
        self.blobs
            .insert(key.as_bytes(), bytes)
            .map_err(|_| BlobError::BlobNotFound)?;
        self.index
            .insert(key.as_bytes(), meta_bytes)
            .map_err(|_| BlobError::BlobNotFound)?;
        Ok(BlobRef {
            cid,
            mime_type: mime_type.to_string(),
            size: bytes.len(),
        })
    }

    pub fn get(&self, cid: &Cid) -> Result<Option<FoundBlob>> {
        let key = cid.to_string();
        let Some(bytes) = self.blobs.get(key.as_bytes())? else {
            return Ok(None);
        };
        let meta: BlobMeta = match self.index.get(key.as_bytes())? {
            Some(meta_bytes) => serde_json::from_slice(&meta_bytes)?,
            None => BlobMeta {
                mime_type: "application/octet-stream".to_string(),
                size: bytes.len(),
            },
        };
        Ok(Some(FoundBlob {
            bytes: bytes.to_vec(),
            mime_type: meta.mime_type,
            size: meta.size,
        }))
    }

    pub fn exists(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blobs.contains_key(cid.to_string().as_bytes())?)
    }

    pub fn delete(&self, cid: &Cid) -> Result<bool> {
        let key = cid.to_string();
        let removed = self.blobs.remove(key.as_bytes())?.is_some();
        self.index.remove(key.as_bytes())?;
        Ok(removed)
    }

    /// Blob refs in CID order; `cursor` is the last CID of the previous page.
    pub fn list(&self, limit: usize, cursor: Option<&str>) -> Result<Vec<BlobRef>> {
        let mut out = Vec::new();
        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> = match cursor {
            Some(cursor) => {
                let mut start = cursor.as_bytes().to_vec();
                start.push(0);
                Box::new(self.index.range(start..))
            }
            None => Box::new(self.index.iter()),
        };
        for item in iter {
            let (key, meta_bytes) = item?;
            let cid_str = String::from_utf8_lossy(&key).to_string();
            let meta: BlobMeta = serde_json::from_slice(&meta_bytes)?;
            out.push(BlobRef {
                cid: Cid::from_str(&cid_str)?,
                mime_type: meta.mime_type,
                size: meta.size,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
