pub mod handlers;
mod routes;

use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Row};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

pub use routes::router;

pub type UserId = Uuid;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern");
}

pub const MIN_PASSWORD_LEN: usize = 6;

/// Public identity of an account. The credential hash never appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PublicUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl<'a> TryFrom<&Row<'a>> for PublicUser {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

/// Stored account, including the password hash.
#[derive(Clone)]
pub(crate) struct UserRecord {
    pub user: PublicUser,
    pub password: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("user", &self.user)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl<'a> TryFrom<&Row<'a>> for UserRecord {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            user: PublicUser::try_from(row)?,
            password: row.get(4)?,
        })
    }
}

pub(crate) const PUBLIC_COLUMNS: &str = "id, username, email, created_at";

pub(crate) fn find_by_id(conn: &Connection, user_id: UserId) -> rusqlite::Result<Option<PublicUser>> {
    conn.query_row(
        &format!("SELECT {PUBLIC_COLUMNS} FROM users WHERE id = ?"),
        [user_id],
        |row| PublicUser::try_from(row),
    )
    .optional()
}

pub(crate) fn find_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<PublicUser>> {
    conn.query_row(
        &format!("SELECT {PUBLIC_COLUMNS} FROM users WHERE username = ?"),
        [username],
        |row| PublicUser::try_from(row),
    )
    .optional()
}

pub(crate) fn find_record(conn: &Connection, login: &str) -> rusqlite::Result<Option<UserRecord>> {
    let by = |column: &str| {
        conn.query_row(
            &format!("SELECT {PUBLIC_COLUMNS}, password FROM users WHERE {column} = ?"),
            [login],
            |row| UserRecord::try_from(row),
        )
        .optional()
    };

    match by("username")? {
        Some(record) => Ok(Some(record)),
        None => by("email"),
    }
}

pub fn validate_email(email: &str) -> Result<()> {
    if EMAIL.is_match(email) {
        Ok(())
    } else {
        Err(Error::Validation("Invalid email format".into()))
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() >= MIN_PASSWORD_LEN {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )))
    }
}

pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::Validation("Username is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        assert!(validate_email("demo@x.com").is_ok());
        assert!(validate_email("demo@x").is_err());
        assert!(validate_email("de mo@x.com").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn password_length() {
        assert!(validate_password("demo12").is_ok());
        assert!(matches!(validate_password("demo1"), Err(Error::Validation(_))));
    }
}
