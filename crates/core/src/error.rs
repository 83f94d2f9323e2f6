//! Unified error types for permacache.

use tokio_rusqlite::rusqlite;

/// Unified error types for the cache engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Blob store I/O failed. Carries the key the operation was addressing.
    #[error("BLOB_IO: {key}: {source}")]
    BlobIo {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The staged temp file handed to `save` was not found.
    #[error("STAGED_FILE_MISSING: {0}")]
    StagedFileMissing(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// HTTP error response from the fetch collaborator.
    #[error("HTTP_ERROR: {0}")]
    HttpError(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl Error {
    /// Wrap an I/O error with the cache key it was operating on.
    pub fn blob_io(key: &str, source: std::io::Error) -> Self {
        Error::BlobIo { key: key.to_string(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::blob_io("en.wikipedia.org__Dog", std::io::Error::other("disk full"));
        assert!(err.to_string().contains("BLOB_IO"));
        assert!(err.to_string().contains("en.wikipedia.org__Dog"));
    }

    #[test]
    fn test_invalid_url_display() {
        let err = Error::InvalidUrl("not a url".to_string());
        assert!(err.to_string().contains("INVALID_URL"));
    }
}
