use lexicon_cid::Cid;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataStoreError {
    #[error("missing block `{0}`")]
    MissingBlock(String),
    #[error("missing `{0}` blocks: `{1:?}`")]
    MissingBlocks(String, Vec<Cid>),
    #[error("unexpected object at `{0}`")]
    UnexpectedObject(Cid),
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("commit was at `{0}`")]
    BadCommitSwap(Cid),
    #[error("record was at `{0:?}`")]
    BadRecordSwap(Option<Cid>),
    #[error("record not found: `{0}`")]
    RecordNotFound(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found")]
    BlobNotFound,
    #[error("blob too large: {0} bytes (max {1})")]
    BlobTooLarge(usize, usize),
}
