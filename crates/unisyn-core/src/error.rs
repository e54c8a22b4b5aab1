use thiserror::Error;

/// Failure of the history store. Surfaced to the caller, never swallowed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),
    #[error("history store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unknown role '{0}' in stored message")]
    InvalidRole(String),
}

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("backend error {status_code}: {body}")]
    Backend { status_code: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for InvokeError {
    fn from(e: reqwest::Error) -> Self {
        InvokeError::Transport(e.to_string())
    }
}

/// Errors produced while handling one chat request.
///
/// Only `MissingPrompt` and a failure to record the user turn reach the
/// request level; everything else is folded into a per-model outcome.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Missing prompt")]
    MissingPrompt,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("model task aborted: {0}")]
    TaskAborted(String),
}
