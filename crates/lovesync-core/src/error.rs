use thiserror::Error;

/// Errors produced by the lovesync sync core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel not open (state: {0})")]
    NotOpen(String),

    #[error("send failed for {local_id}: {reason}")]
    SendFailed { local_id: String, reason: String },

    #[error("message is empty")]
    EmptyMessage,

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid message state: {0}")]
    InvalidState(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timed out")]
    Timeout,
}

/// Reasons an inbound frame could not be turned into an [`Envelope`](crate::messages::Envelope).
///
/// Always non-fatal: the frame is dropped and the connection stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("malformed JSON: {0}")]
    Malformed(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Codec(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
