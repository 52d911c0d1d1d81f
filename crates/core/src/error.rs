use thiserror::Error;

/// Message fragments that mark a failure as a temporary service condition.
const TRANSIENT_INDICATORS: [&str; 8] = [
    "network",
    "timed out",
    "timeout",
    "connection",
    "unavailable",
    "temporarily",
    "econnreset",
    "could not reach",
];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// How a caller should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Operator or caller precondition is not met; retrying will not help.
    Precondition,
    /// The backing service could not be reached; retry later.
    Transient,
    /// The input could not be processed; retry only with different input.
    Processing,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index '{0}' not found, please create it first")]
    IndexNotFound(String),

    #[error("missing identifier: {0}")]
    MissingIdentifier(&'static str),

    #[error("invalid response from {backend} ({status}): {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index request failed: {0}")]
    Request(String),

    #[error("document processing failed: {0}")]
    Processing(String),

    #[error("document store error: {0}")]
    Storage(#[from] StorageError),
}

impl IndexError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IndexError::IndexNotFound(_)
            | IndexError::MissingIdentifier(_)
            | IndexError::Storage(StorageError::NotFound(_))
            | IndexError::Storage(StorageError::InvalidArgument(_)) => ErrorClass::Precondition,
            IndexError::Http(error) if error.is_connect() || error.is_timeout() => {
                ErrorClass::Transient
            }
            IndexError::BackendResponse { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            other if has_transient_indicator(&other.to_string()) => ErrorClass::Transient,
            _ => ErrorClass::Processing,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("chat history error: {0}")]
    History(#[from] StorageError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend} ({status}): {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("language model returned no completion")]
    EmptyCompletion,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ChatError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChatError::Index(error) => error.class(),
            ChatError::InvalidArgument(_) => ErrorClass::Precondition,
            ChatError::Http(error) if error.is_connect() || error.is_timeout() => {
                ErrorClass::Transient
            }
            ChatError::BackendResponse { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            other if has_transient_indicator(&other.to_string()) => ErrorClass::Transient,
            _ => ErrorClass::Processing,
        }
    }
}

pub fn has_transient_indicator(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator))
}
