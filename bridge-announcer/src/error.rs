use thiserror::Error;

use bridge_common::sink::PublishError;

/// Errors surfaced by the source-database client.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("couchdb request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("couchdb url is invalid: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("source database unavailable: {0}")]
    Unavailable(String),
}

/// Errors aborting one announcer operation. None of these corrupt the
/// persisted cursor; the database is re-attempted on a later notification.
#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("failed to persist sequence cursor: {0}")]
    Store(#[from] std::io::Error),
}
