use rusqlite::{Connection, OptionalExtension};

use crate::{users::UserId, Error, Result, DB};

use super::NoteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteRole {
    Owner,
    Collaborator,
}

pub(crate) fn not_found(note_id: NoteId) -> Error {
    Error::NotFound(format!("Note '{note_id}' not found"))
}

/// Relation of `user_id` to the note, `None` when the note is missing
/// or not shared with the user.
pub(crate) fn role(conn: &Connection, note_id: NoteId, user_id: UserId) -> rusqlite::Result<Option<NoteRole>> {
    let row = conn
        .query_row(
            r#"SELECT
                owner_id = ?2,
                EXISTS (SELECT 1 FROM collaborators WHERE note_id = ?1 AND user_id = ?2)
            FROM notes WHERE id = ?1"#,
            [note_id, user_id],
            |row| Ok((row.get::<_, bool>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional()?;

    Ok(match row {
        Some((true, _)) => Some(NoteRole::Owner),
        Some((false, true)) => Some(NoteRole::Collaborator),
        _ => None,
    })
}

/// Owner or collaborator. Anyone else gets the same answer as for a
/// missing note.
pub(crate) fn require_access(conn: &Connection, note_id: NoteId, user_id: UserId) -> Result<NoteRole> {
    role(conn, note_id, user_id)?.ok_or_else(|| not_found(note_id))
}

pub(crate) fn require_owner(conn: &Connection, note_id: NoteId, user_id: UserId, action: &str) -> Result<()> {
    match require_access(conn, note_id, user_id)? {
        NoteRole::Owner => Ok(()),
        NoteRole::Collaborator => Err(Error::Forbidden(format!("Only the note owner can {action}"))),
    }
}

/// Read and mutate checks for notes.
#[derive(Clone, Debug)]
pub struct AccessGuard {
    db: DB,
}

impl AccessGuard {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    pub async fn role(&self, note_id: NoteId, user_id: UserId) -> Result<Option<NoteRole>> {
        self.db
            .call(move |conn| role(conn, note_id, user_id).map_err(|e| e.into()))
            .await
            .map_err(Error::from)
    }

    /// Owner or collaborator.
    pub async fn can_access(&self, note_id: NoteId, user_id: UserId) -> Result<bool> {
        Ok(self.role(note_id, user_id).await?.is_some())
    }

    /// Owner only.
    pub async fn can_mutate(&self, note_id: NoteId, user_id: UserId) -> Result<bool> {
        Ok(self.role(note_id, user_id).await? == Some(NoteRole::Owner))
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::db::init_test_db;

    #[tokio::test]
    async fn roles() -> Result<()> {
        let db = init_test_db().await?;

        let (note_id, owner, collaborator, stranger) = db
            .call(|conn| {
                let user = |name: &str| {
                    conn.query_row(
                        "INSERT INTO users (username, email, password) VALUES (?1, ?1 || '@x.com', 'h') RETURNING id",
                        [name],
                        |r| r.get::<_, Uuid>(0),
                    )
                };
                let owner = user("owner")?;
                let collaborator = user("collaborator")?;
                let stranger = user("stranger")?;

                let note_id: Uuid = conn.query_row(
                    "INSERT INTO notes (owner_id, title) VALUES (?, 'n') RETURNING id",
                    [owner],
                    |r| r.get(0),
                )?;
                conn.execute(
                    "INSERT INTO collaborators (note_id, user_id) VALUES (?, ?)",
                    [note_id, collaborator],
                )?;
                Ok((note_id, owner, collaborator, stranger))
            })
            .await?;

        let guard = AccessGuard::new(db);

        assert_eq!(guard.role(note_id, owner).await?, Some(NoteRole::Owner));
        assert!(guard.can_access(note_id, owner).await?);
        assert!(guard.can_mutate(note_id, owner).await?);

        assert_eq!(guard.role(note_id, collaborator).await?, Some(NoteRole::Collaborator));
        assert!(guard.can_access(note_id, collaborator).await?);
        assert!(!guard.can_mutate(note_id, collaborator).await?);

        assert!(!guard.can_access(note_id, stranger).await?);
        assert!(!guard.can_access(Uuid::now_v7(), owner).await?);
        Ok(())
    }
}
