use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabulaError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("record {id} not found in table {table} (status {status})")]
    NotFound {
        table: String,
        id: String,
        status: u16,
    },

    #[error("update requires a primary key value (none of the key fields is set)")]
    MissingKey,

    #[error("could not locate record {id} for deletion (tried fields: {})", tried.join(", "))]
    Resolution { id: String, tried: Vec<String> },

    #[error("record {0} is not in the local list")]
    NotInList(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("login failed: {0}")]
    Auth(String),

    #[error("upload error: {0}")]
    Upload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TabulaError {
    /// Builds a `Backend` error, keeping at most `limit` characters of the body.
    pub fn backend(status: u16, body: &str, limit: usize) -> Self {
        TabulaError::Backend {
            status,
            body: truncate_chars(body, limit),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TabulaError::Backend { status, .. } | TabulaError::NotFound { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, TabulaError>;
