#[macro_use]
extern crate rocket;

use dotenvy::dotenv;
use hearth_pds::actor_store::ActorStore;
use hearth_pds::apis::{com, ErrorBody};
use hearth_pds::config::env_to_cfg;
use hearth_pds::content::{ContentSource, MemoryContentSource};
use hearth_pds::dispatcher::Dispatcher;
use hearth_pds::followers::FollowerStore;
use hearth_pds::poller::{RelayPoller, SubscriptionStore};
use hearth_pds::publisher::sync_content;
use hearth_pds::sequencer::Sequencer;
use hearth_pds::well_known::{atproto_did, did_json};
use hearth_pds::{SharedActorStore, SharedContentSource, SharedSequencer};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::shield::{NoSniff, Shield};
use rocket::{Request, Response};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "Add CORS headers to responses",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "POST, GET, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
    }
}

#[get("/")]
async fn index() -> &'static str {
    "This is an AT Protocol Personal Data Server (PDS).\n\nMost API routes are under /xrpc/"
}

#[get("/robots.txt")]
async fn robots() -> &'static str {
    "# Hello!\n\n# Crawling the public API is allowed\nUser-agent: *\nAllow: /"
}

#[derive(serde::Serialize)]
struct ServerVersion {
    version: String,
}

#[get("/xrpc/_health")]
async fn health() -> Json<ServerVersion> {
    Json(ServerVersion {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Catches all OPTION requests in order to get the CORS fairing triggered.
#[options("/<_..>")]
async fn all_options() {
    /* Intentionally left empty */
}

#[catch(401)]
fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "AuthenticationRequired".to_string(),
        message: "Authentication Required".to_string(),
    })
}

#[catch(403)]
fn forbidden() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "InvalidToken".to_string(),
        message: "Token is invalid".to_string(),
    })
}

#[catch(404)]
fn not_found() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "MethodNotImplemented".to_string(),
        message: "Method Not Implemented".to_string(),
    })
}

#[catch(default)]
fn default_catcher() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: "InternalServerError".to_string(),
        message: "Internal error.".to_string(),
    })
}

#[launch]
async fn rocket() -> _ {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = env_to_cfg();
    let db = sled::open(&cfg.data_dir).expect("could not open data directory");

    let actor_store = ActorStore::open(&db, &cfg.service.did, cfg.blob.max_blob_size)
        .expect("could not open actor store");
    let mut sequencer = Sequencer::new(&db, cfg.firehose.queue_capacity)
        .expect("could not open sequencer");

    // a changed handle is announced on the firehose once, at boot
    let identity = db.open_tree("identity").expect("could not open identity tree");
    let prev_handle = identity
        .get("handle")
        .ok()
        .flatten()
        .map(|v| String::from_utf8_lossy(&v).to_string());
    if let Some(prev) = prev_handle {
        if prev != cfg.service.handle {
            if let Err(err) = sequencer
                .sequence_identity_evt(&cfg.service.did, Some(cfg.service.handle.clone()))
            {
                tracing::warn!("could not sequence identity event: {err}");
            }
        }
    }
    let _ = identity.insert("handle", cfg.service.handle.as_bytes());

    let content: Arc<dyn ContentSource> = Arc::new(MemoryContentSource::new());
    let followers = Arc::new(FollowerStore::open(&db).expect("could not open follower store"));
    let subscriptions =
        Arc::new(SubscriptionStore::open(&db).expect("could not open subscription store"));
    let dispatcher = Arc::new(Dispatcher::new(
        cfg.service.did.clone(),
        content.clone(),
        followers.clone(),
    ));

    let actor_store = SharedActorStore {
        actor_store: RwLock::new(actor_store),
    };
    let sequencer = SharedSequencer {
        sequencer: RwLock::new(sequencer),
    };

    // promote host content before serving
    if let Err(err) = sync_content(content.as_ref(), &actor_store, &sequencer).await {
        tracing::error!("content promotion failed: {err:?}");
    }

    let poller = Arc::new(
        RelayPoller::new(cfg.poller.clone(), subscriptions.clone(), dispatcher.clone())
            .expect("could not build relay poller"),
    );
    tokio::spawn(poller.run());

    let figment = rocket::Config::figment()
        .merge(("port", cfg.service.port))
        .merge(("address", "0.0.0.0"));

    let shield = Shield::default().enable(NoSniff::Enable);

    rocket::custom(figment)
        .mount(
            "/",
            routes![
                index,
                robots,
                health,
                did_json,
                atproto_did,
                com::atproto::identity::resolve_handle::resolve_handle,
                com::atproto::repo::create_record::create_record,
                com::atproto::repo::delete_record::delete_record,
                com::atproto::repo::describe_repo::describe_repo,
                com::atproto::repo::get_record::get_record,
                com::atproto::repo::list_records::list_records,
                com::atproto::repo::put_record::put_record,
                com::atproto::repo::upload_blob::upload_blob,
                com::atproto::server::describe_server::describe_server,
                com::atproto::sync::get_blob::get_blob,
                com::atproto::sync::get_latest_commit::get_latest_commit,
                com::atproto::sync::get_repo::get_repo,
                com::atproto::sync::list_blobs::list_blobs,
                com::atproto::sync::subscribe_repos::subscribe_repos,
                all_options
            ],
        )
        .register(
            "/",
            catchers![unauthorized, forbidden, not_found, default_catcher],
        )
        .attach(Cors)
        .attach(shield)
        .manage(cfg)
        .manage(actor_store)
        .manage(sequencer)
        .manage(SharedContentSource { content })
        .manage(dispatcher)
        .manage(subscriptions)
}
