use crate::config::ServerConfig;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    BadToken,
}

/// Bearer credential gate for write procedures. Verifying the credential
/// beyond equality with the configured token is the embedder's concern;
/// with no token configured, writes are open (dev mode).
pub struct AccessWrite {
    #[allow(dead_code)]
    pub token: Option<String>,
}

fn bearer_token(req: &Request<'_>) -> Option<String> {
    let header = req.headers().get_one("Authorization")?;
    header
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AccessWrite {
    type Error = AuthError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cfg = match req.rocket().state::<ServerConfig>() {
            Some(cfg) => cfg,
            None => return Outcome::Error((Status::InternalServerError, AuthError::MissingToken)),
        };
        let token = bearer_token(req);
        match (&cfg.access_token, &token) {
            (None, _) => Outcome::Success(AccessWrite { token }),
            (Some(_), None) => Outcome::Error((Status::Unauthorized, AuthError::MissingToken)),
            (Some(expected), Some(got)) if expected == got => {
                Outcome::Success(AccessWrite { token })
            }
            (Some(_), Some(_)) => Outcome::Error((Status::Forbidden, AuthError::BadToken)),
        }
    }
}
