use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing index for {0}")]
    MissingIndex(PathBuf),

    #[error("unreadable file {path}: {source}")]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("unknown contig: {0}")]
    UnknownContig(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("duplicate field definition: {0}")]
    DuplicateField(String),

    #[error("invalid field definition: {0}")]
    InvalidDefinition(String),

    #[error("unsupported value for {id}: {value} does not fit Type={kind}")]
    UnsupportedType {
        id: String,
        value: &'static str,
        kind: String,
    },

    #[error("value out of range for {id}: {reason}")]
    OutOfRange { id: String, reason: String },

    #[error("field not declared in schema: {0}")]
    UndeclaredField(String),

    #[error("reader unavailable after a failed query")]
    ReaderUnavailable,

    #[error("source is closed")]
    Closed,

    #[error("blocking iteration inside a current-thread async runtime; use Query::recv")]
    BlockingInRuntime,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors raised while opening a source.
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            Error::MissingIndex(_) | Error::UnreadableFile { .. } | Error::InvalidIndex(_)
        )
    }

    /// Errors scoped to a single query; the source stays usable afterwards.
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownContig(_) | Error::InvalidRegion(_) | Error::BlockingInRuntime
        )
    }

    /// Caller errors from writing a field value.
    pub fn is_field_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedType { .. } | Error::OutOfRange { .. } | Error::UndeclaredField(_)
        )
    }
}
