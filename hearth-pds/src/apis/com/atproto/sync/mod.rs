pub mod get_blob;
pub mod get_latest_commit;
pub mod get_repo;
pub mod list_blobs;
pub mod subscribe_repos;
