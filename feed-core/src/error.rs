use thiserror::Error;

/// Failure while retrieving a feed over HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bad status code {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("invalid feed url {0}")]
    InvalidUrl(String),
    #[error("feed too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },
}

/// Failure while turning a fetched body into articles.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("not a valid RSS or Atom document ({url}): {reason}")]
    Unrecognized { url: String, reason: String },
    #[error("unsupported charset {0}")]
    Charset(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("message channel closed unexpectedly")]
    Closed,
    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available")]
    NoConfigDir,
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Undefined {0}")]
    Missing(&'static str),
}

#[derive(Debug, Error)]
#[error("new article computation failed: {0}")]
pub struct DedupError(pub String);

/// Classification of a per-link failure, decides how loudly it is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Fetch,
    Parse,
    Unexpected,
}

impl ErrorKind {
    /// Fetch and parse failures are part of normal operation for a public feed.
    pub fn is_expected(self) -> bool {
        matches!(self, ErrorKind::Fetch | ErrorKind::Parse)
    }
}

/// Anything that can abort the processing of a single link.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dedup(#[from] DedupError),
    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Fetch(_) => ErrorKind::Fetch,
            PipelineError::Parse(_) => ErrorKind::Parse,
            PipelineError::Store(_) | PipelineError::Dedup(_) | PipelineError::Ipc(_) => {
                ErrorKind::Unexpected
            }
        }
    }
}

/// Setup failures that abort the whole worker before any link is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to connect to store: {0}")]
    Connect(#[source] StoreError),
    #[error("failed to load stored documents: {0}")]
    LoadDocuments(#[source] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_link_errors() {
        let config = PipelineError::Config("half validator pair".into());
        assert_eq!(config.kind(), ErrorKind::Config);
        assert!(!config.kind().is_expected());

        let parse = PipelineError::from(ParseError::Charset("x-unknown".into()));
        assert_eq!(parse.kind(), ErrorKind::Parse);
        assert!(parse.kind().is_expected());

        let status = PipelineError::from(FetchError::Status {
            url: "http://e/feed".into(),
            status: 500,
        });
        assert!(status.kind().is_expected());

        let dedup = PipelineError::from(DedupError("boom".into()));
        assert_eq!(dedup.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn missing_field_message() {
        assert_eq!(FeedError::Missing("title").to_string(), "Undefined title");
    }
}
