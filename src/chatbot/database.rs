//! Persistent SQLite store for persona labels and warm-up accounts.

use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Label a counterparty gets on first contact, before anyone classifies them.
pub const DEFAULT_LABEL: &str = "new";

/// A bot-controlled account participating in warm-up chatter.
/// Status 0 = active; anything else keeps the account out of rotation.
#[derive(Debug, Clone)]
pub struct Account {
    pub chat_id: i64,
    pub name: String,
    pub status: i64,
}

/// SQLite store behind a connection mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema();
        db
    }

    /// Open (or create) the database at the given path.
    pub fn load_or_new(path: &Path) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema();

        let (users, accounts) = db.get_counts();
        info!(
            "Loaded database from {:?} ({} users, {} accounts)",
            path, users, accounts
        );
        db
    }

    fn init_schema(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                label TEXT NOT NULL DEFAULT 'new'
            );

            CREATE TABLE IF NOT EXISTS accounts (
                chat_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_users_label ON users(label);
        "#,
        )
        .expect("Failed to initialize database schema");
    }

    fn get_counts(&self) -> (usize, usize) {
        let conn = self.conn.lock().unwrap();
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap_or(0);
        let accounts: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .unwrap_or(0);
        (users as usize, accounts as usize)
    }

    pub fn get_label(&self, user_id: i64) -> Option<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT label FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .unwrap_or(None)
    }

    /// Register a new counterparty with the default label.
    pub fn add_user(&self, user_id: i64) -> String {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, label) VALUES (?1, ?2)",
            params![user_id, DEFAULT_LABEL],
        )
        .ok();
        DEFAULT_LABEL.to_string()
    }

    /// Label for `user_id`, creating the default record on first contact.
    pub fn resolve_label(&self, user_id: i64) -> String {
        match self.get_label(user_id) {
            Some(label) => label,
            None => {
                info!("First contact from {}, labeling '{}'", user_id, DEFAULT_LABEL);
                self.add_user(user_id)
            }
        }
    }

    pub fn set_label(&self, user_id: i64, label: &str) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (user_id, label) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET label = ?2",
            params![user_id, label],
        )
        .ok();
    }

    /// All known counterparties, for the daily outreach round.
    pub fn all_users(&self) -> Vec<i64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare("SELECT user_id FROM users ORDER BY user_id") {
            Ok(stmt) => stmt,
            Err(_) => return vec![],
        };
        stmt.query_map([], |row| row.get(0))
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    pub fn upsert_account(&self, chat_id: i64, name: &str, status: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts (chat_id, name, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET name = ?2, status = ?3",
            params![chat_id, name, status],
        )
        .ok();
    }

    pub fn account_status(&self, chat_id: i64) -> Option<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT status FROM accounts WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )
        .optional()
        .unwrap_or(None)
    }

    pub fn set_account_status(&self, chat_id: i64, status: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE accounts SET status = ?1 WHERE chat_id = ?2",
            params![status, chat_id],
        )
        .ok();
    }

    pub fn all_accounts(&self) -> Vec<Account> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare("SELECT chat_id, name, status FROM accounts ORDER BY chat_id") {
            Ok(stmt) => stmt,
            Err(_) => return vec![],
        };
        stmt.query_map([], |row| {
            Ok(Account {
                chat_id: row.get(0)?,
                name: row.get(1)?,
                status: row.get(2)?,
            })
        })
        .map(|rows| rows.flatten().collect())
        .unwrap_or_default()
    }

    pub fn delete_account(&self, chat_id: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM accounts WHERE chat_id = ?1", params![chat_id])
            .ok();
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
