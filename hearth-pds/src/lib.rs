#[macro_use]
extern crate serde_derive;
extern crate rocket;

use crate::actor_store::ActorStore;
use crate::content::ContentSource;
use crate::sequencer::Sequencer;
use std::sync::Arc;
use tokio::sync::RwLock;

pub static APP_USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
);

/// The one repository this node hosts, behind the single write lock.
/// Writers hold the lock from swap-check through event emission; readers
/// load a snapshot of the current root and proceed without it.
pub struct SharedActorStore {
    pub actor_store: RwLock<ActorStore>,
}

pub struct SharedSequencer {
    pub sequencer: RwLock<Sequencer>,
}

pub struct SharedContentSource {
    pub content: Arc<dyn ContentSource>,
}

pub mod actor_store;
pub mod apis;
pub mod auth;
pub mod config;
pub mod content;
pub mod dispatcher;
pub mod followers;
pub mod identity;
pub mod poller;
pub mod publisher;
pub mod sequencer;
pub mod well_known;
pub mod xrpc;
