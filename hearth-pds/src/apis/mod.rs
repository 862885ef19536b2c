use crate::actor_store::WriteError;
use hearth_repo::cbor::CodecError;
use hearth_repo::error::BlobError;
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use rocket::{response, Request};

pub mod com;

/// Wire errors. The identifier is stable; the message is for humans.
#[derive(Clone, Debug)]
pub enum ApiError {
    InvalidRequest(String),
    InvalidHandle,
    HandleNotFound,
    RepoNotFound(String),
    RecordNotFound,
    UnsupportedCollection(String),
    InvalidSwap(String),
    BlobTooLarge(String),
    BlobNotFound,
    MalformedEncoding(String),
    CreateFailed(String),
    WriteFailed(String),
    UploadFailed,
    AuthenticationRequired,
    InvalidToken,
    MethodNotImplemented,
    InternalServerError,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn parts(&self) -> (Status, &'static str, String) {
        match self {
            ApiError::InvalidRequest(msg) => {
                (Status::BadRequest, "InvalidRequest", msg.clone())
            }
            ApiError::InvalidHandle => (
                Status::BadRequest,
                "InvalidHandle",
                "Handle is invalid".to_string(),
            ),
            ApiError::HandleNotFound => (
                Status::NotFound,
                "HandleNotFound",
                "Unable to resolve handle".to_string(),
            ),
            ApiError::RepoNotFound(repo) => (
                Status::BadRequest,
                "RepoNotFound",
                format!("Could not find repo: {repo}"),
            ),
            ApiError::RecordNotFound => (
                Status::NotFound,
                "RecordNotFound",
                "Record could not be found".to_string(),
            ),
            ApiError::UnsupportedCollection(msg) => {
                (Status::BadRequest, "UnsupportedCollection", msg.clone())
            }
            ApiError::InvalidSwap(msg) => (Status::BadRequest, "InvalidSwap", msg.clone()),
            ApiError::BlobTooLarge(msg) => (Status::BadRequest, "BlobTooLarge", msg.clone()),
            ApiError::BlobNotFound => (
                Status::NotFound,
                "BlobNotFound",
                "Blob could not be found".to_string(),
            ),
            ApiError::MalformedEncoding(msg) => {
                (Status::BadRequest, "MalformedEncoding", msg.clone())
            }
            ApiError::CreateFailed(msg) => (Status::BadRequest, "CreateFailed", msg.clone()),
            ApiError::WriteFailed(msg) => (Status::BadRequest, "WriteFailed", msg.clone()),
            ApiError::UploadFailed => (
                Status::BadRequest,
                "UploadFailed",
                "Upload failed".to_string(),
            ),
            ApiError::AuthenticationRequired => (
                Status::Unauthorized,
                "AuthenticationRequired",
                "Authentication Required".to_string(),
            ),
            ApiError::InvalidToken => (
                Status::BadRequest,
                "InvalidToken",
                "Token is invalid".to_string(),
            ),
            ApiError::MethodNotImplemented => (
                Status::NotImplemented,
                "MethodNotImplemented",
                "Method Not Implemented".to_string(),
            ),
            ApiError::InternalServerError => (
                Status::InternalServerError,
                "InternalServerError",
                "Something went wrong".to_string(),
            ),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (_, code, message) = self.parts();
        write!(f, "{code}: {message}")
    }
}

impl<'r, 'o: 'r> response::Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let (status, code, message) = self.parts();
        let body = Json(ErrorBody {
            error: code.to_string(),
            message,
        });
        let mut res = <Json<ErrorBody> as response::Responder>::respond_to(body, req)?;
        res.set_header(ContentType::JSON);
        res.set_status(status);
        Ok(res)
    }
}

impl From<WriteError> for ApiError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::BadCommitSwap(_) | WriteError::BadRecordSwap(_) => {
                ApiError::InvalidSwap(err.to_string())
            }
            WriteError::RecordAlreadyExists(path) => {
                ApiError::CreateFailed(format!("record already exists at {path}"))
            }
            WriteError::RecordNotFound(_) => ApiError::RecordNotFound,
            WriteError::UnsupportedCollection(msg) => ApiError::UnsupportedCollection(msg),
            WriteError::InvalidRecord(msg) => ApiError::InvalidRequest(msg),
            WriteError::Other(err) => {
                tracing::error!("write failed: {err:?}");
                ApiError::WriteFailed("could not apply write".to_string())
            }
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::BlobTooLarge(_, _) => ApiError::BlobTooLarge(err.to_string()),
            BlobError::BlobNotFound => ApiError::BlobNotFound,
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        ApiError::MalformedEncoding(err.to_string())
    }
}
