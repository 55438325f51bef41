use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot encode field '{field}': {reason}")]
    Encoding { field: String, reason: String },

    #[error("Corrupt snapshot {location}: {reason}")]
    CorruptData { location: String, reason: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Cannot undo {hash}: later commit {conflicting} changed the same data")]
    Conflict { hash: String, conflicting: String },

    #[error("History backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Commit {commit} is durable but the live store was not resynchronized: {reason}")]
    Resync { commit: String, reason: String },

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// A resync failure leaves history in its new state; only the live
    /// store needs repair.
    pub fn is_warning(&self) -> bool {
        matches!(self, Error::Resync { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::EntityNotFound(_) | Error::CommitNotFound(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
