use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::domain::{Filter, ListParams, Record, TableId};
use crate::error::{Result, TabulaError};
use crate::repo::TableRepo;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub email: String,
    /// Unix seconds.
    pub created_at: i64,
}

impl Session {
    pub fn created(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.created_at).ok()
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create(&self, id: impl Into<String>, email: impl Into<String>) -> Result<Session> {
        let session = Session {
            id: id.into(),
            email: email.into(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &session)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| TabulaError::Io(e.error))?;
        tracing::debug!(path = %self.path.display(), email = %session.email, "session saved");
        Ok(session)
    }

    /// The stored session, or `None` when absent or unreadable.
    pub fn load(&self) -> Option<Session> {
        let raw = fs::read(&self.path).ok()?;
        match serde_json::from_slice(&raw) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring corrupt session file");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Column names of the users table.
#[derive(Clone, Debug)]
pub struct LoginFields {
    pub email: String,
    pub password: String,
    pub active: String,
}

impl Default for LoginFields {
    fn default() -> Self {
        Self {
            email: "email".into(),
            password: "senha".into(),
            active: "ativo".into(),
        }
    }
}

/// Finds the active user with `email` and checks `password` against the
/// stored value. Returns the user row.
pub async fn login(
    repo: &dyn TableRepo,
    table: &TableId,
    email: &str,
    password: &str,
    fields: &LoginFields,
) -> Result<Record> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(TabulaError::Auth("e-mail and password are required".into()));
    }
    let params = ListParams::default()
        .with_filter(Filter::eq(fields.email.clone(), email).and(Filter::eq(fields.active.clone(), true)))
        .with_limit(1);
    let user = repo
        .list(table, &params)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| TabulaError::Auth("user not found or inactive".into()))?;

    let stored = match user.get(&fields.password) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    if stored != password {
        tracing::info!(%email, "rejected login");
        return Err(TabulaError::Auth("invalid credentials".into()));
    }
    Ok(user)
}
