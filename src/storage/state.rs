//! StateStore - scalar key/value slots kept outside the event table.

use crate::error::StoreError;
use crate::storage::Database;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// Slot holding the bearer token (local credential backend).
pub const AUTH_TOKEN_KEY: &str = "auth_token";
/// Slot holding the wall-clock ms of the last completed sync attempt.
pub const LAST_SYNC_KEY: &str = "last_sync";
/// Slot holding the wall-clock ms at which the next interval sync is due.
pub const SYNC_ALARM_KEY: &str = "sync_alarm_due";
/// Slot holding the account email reported at login, if any.
pub const USER_EMAIL_KEY: &str = "user_email";

#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM state WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM state WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    /// Drop every slot.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM state", [])?;
            Ok(())
        })
    }

    fn get_millis(&self, key: &str) -> Result<Option<i64>, StoreError> {
        // A slot that does not parse is treated as unset
        Ok(self.get(key)?.and_then(|value| value.parse().ok()))
    }

    pub fn last_sync(&self) -> Result<Option<i64>, StoreError> {
        self.get_millis(LAST_SYNC_KEY)
    }

    pub fn set_last_sync(&self, millis: i64) -> Result<(), StoreError> {
        self.set(LAST_SYNC_KEY, &millis.to_string())
    }

    pub fn sync_alarm_due(&self) -> Result<Option<i64>, StoreError> {
        self.get_millis(SYNC_ALARM_KEY)
    }

    pub fn set_sync_alarm_due(&self, millis: i64) -> Result<(), StoreError> {
        self.set(SYNC_ALARM_KEY, &millis.to_string())
    }

    pub fn user_email(&self) -> Result<Option<String>, StoreError> {
        self.get(USER_EMAIL_KEY)
    }

    /// Store the email, or drop the slot for `None`.
    pub fn set_user_email(&self, email: Option<&str>) -> Result<(), StoreError> {
        match email {
            Some(email) => self.set(USER_EMAIL_KEY, email),
            None => self.remove(USER_EMAIL_KEY),
        }
    }
}
