//! Persisted login session (token and current user) in a small SQLite file.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::api::types::User;
use crate::config::Config;

/// A login restored from disk.
#[derive(Debug, Clone)]
pub struct StoredSession {
  pub token: String,
  pub user: User,
  pub saved_at: DateTime<Utc>,
}

/// Short SHA-256 fingerprint of a token, safe to log.
pub fn fingerprint(token: &str) -> String {
  let digest = hex::encode(Sha256::digest(token.as_bytes()));
  digest[..12].to_string()
}

pub struct SessionStore {
  conn: Mutex<Connection>,
}

impl SessionStore {
  /// Open or create the session database in the data directory.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("session.db");
    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Replace the stored session.
  pub fn save(&self, token: &str, user: &User) -> Result<()> {
    let user_json = serde_json::to_string(user)?;
    self.conn()?.execute(
      "INSERT OR REPLACE INTO session (id, token, user, saved_at) VALUES (1, ?1, ?2, ?3)",
      params![token, user_json, Utc::now().to_rfc3339()],
    )?;
    Ok(())
  }

  /// Load the stored session, if any. Unreadable data is an error so the
  /// caller can drop it.
  pub fn load(&self) -> Result<Option<StoredSession>> {
    let row = self
      .conn()?
      .query_row(
        "SELECT token, user, saved_at FROM session WHERE id = 1",
        [],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
          ))
        },
      )
      .optional()?;

    let Some((token, user_json, saved_at)) = row else {
      return Ok(None);
    };

    let user: User = serde_json::from_str(&user_json)
      .map_err(|e| eyre!("Stored user is unreadable: {}", e))?;
    let saved_at = DateTime::parse_from_rfc3339(&saved_at)
      .map(|t| t.with_timezone(&Utc))
      .map_err(|e| eyre!("Stored session time is unreadable: {}", e))?;

    Ok(Some(StoredSession {
      token,
      user,
      saved_at,
    }))
  }

  pub fn clear(&self) -> Result<()> {
    self.conn()?.execute("DELETE FROM session", [])?;
    Ok(())
  }
}

const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    token TEXT NOT NULL,
    user TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
"#;
