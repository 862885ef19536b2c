use crate::config::ServerConfig;
use crate::identity::build_did_doc;
use crate::SharedActorStore;
use rocket::http::ContentType;
use rocket::State;

#[rocket::get("/.well-known/did.json")]
pub async fn did_json(
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> (ContentType, String) {
    let multibase = {
        let store = actor_store.actor_store.read().await;
        store.keypair().public_multibase()
    };
    let doc = build_did_doc(
        &cfg.service.did,
        &cfg.service.handle,
        &cfg.service.public_url,
        &multibase,
    );
    (
        ContentType::new("application", "did+json"),
        doc.to_string(),
    )
}

#[rocket::get("/.well-known/atproto-did")]
pub async fn atproto_did(cfg: &State<ServerConfig>) -> (ContentType, String) {
    (ContentType::Plain, cfg.service.did.clone())
}
