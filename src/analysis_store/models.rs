use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailureKind {
    /// The database could not be reached or is busy.
    Unavailable,
    /// A uniqueness constraint could not be satisfied.
    Conflict,
    /// Stored data could not be decoded.
    Corrupt,
    /// The caller supplied an unusable argument.
    Invalid,
}

impl StoreFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreFailureKind::Unavailable => "unavailable",
            StoreFailureKind::Conflict => "conflict",
            StoreFailureKind::Corrupt => "corrupt",
            StoreFailureKind::Invalid => "invalid",
        }
    }
}

impl fmt::Display for StoreFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected failure of a store operation. Never shown to end users.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store {kind}: {message}")]
pub struct StoreFailure {
    pub kind: StoreFailureKind,
    pub message: String,
}

impl StoreFailure {
    pub fn new(kind: StoreFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreFailure {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let kind = match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::ConstraintViolation => StoreFailureKind::Conflict,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => StoreFailureKind::Corrupt,
                _ => StoreFailureKind::Unavailable,
            },
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => StoreFailureKind::Corrupt,
            _ => StoreFailureKind::Unavailable,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for StoreFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(StoreFailureKind::Corrupt, err.to_string())
    }
}

/// Result of a read that may legitimately find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Failed(StoreFailure),
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }
}

impl<T> From<Result<Option<T>, StoreFailure>> for Lookup<T> {
    fn from(result: Result<Option<T>, StoreFailure>) -> Self {
        match result {
            Ok(Some(value)) => Lookup::Found(value),
            Ok(None) => Lookup::NotFound,
            Err(failure) => Lookup::Failed(failure),
        }
    }
}
