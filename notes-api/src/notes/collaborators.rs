use chrono::Utc;
use indexmap::IndexSet;
use rusqlite::params;

use crate::{
    users::{self, PublicUser, UserId},
    Error, Result, DB,
};

use super::{access, aggregate, writer::touch, Collaborator, NoteId, ShareOutcome, SkipReason, SkippedUsername};

/// Maintains who a note is shared with.
#[derive(Clone, Debug)]
pub struct CollaboratorResolver {
    db: DB,
}

impl CollaboratorResolver {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    /// Replaces the whole collaborator set with the users named in
    /// `usernames`. Names that do not resolve, resolve to the owner or
    /// repeat are skipped and reported; they never fail the call.
    pub async fn share(&self, note_id: NoteId, requester: UserId, usernames: Vec<String>) -> Result<ShareOutcome> {
        let outcome = self
            .db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();

                access::require_owner(&tx, note_id, requester, "share it")?;
                tx.execute("DELETE FROM collaborators WHERE note_id = ?", [note_id])?;

                let mut seen = IndexSet::new();
                let mut added = vec![];
                let mut skipped = vec![];

                for username in usernames {
                    let reason = match users::find_by_username(&tx, &username)? {
                        None => Some(SkipReason::NotFound),
                        Some(user) if user.id == requester => Some(SkipReason::Owner),
                        Some(user) if !seen.insert(user.id) => Some(SkipReason::Duplicate),
                        Some(user) => {
                            tx.execute(
                                "INSERT OR IGNORE INTO collaborators (note_id, user_id, created_at) VALUES (?, ?, ?)",
                                params![note_id, user.id, now],
                            )?;
                            None
                        }
                    };

                    match reason {
                        Some(reason) => skipped.push(SkippedUsername { username, reason }),
                        None => added.push(username),
                    }
                }

                touch(&tx, note_id, now)?;
                let note = aggregate::load(&tx, note_id)?;
                tx.commit()?;

                Ok(ShareOutcome { note, added, skipped })
            })
            .await?;

        for username in &outcome.added {
            tracing::info!(note_id = %note_id, "shared note with {username}");
        }
        for SkippedUsername { username, reason } in &outcome.skipped {
            tracing::warn!(note_id = %note_id, "skipped collaborator {username}: {reason:?}");
        }

        Ok(outcome)
    }

    /// Adds a single collaborator by username. Owner only.
    pub async fn add_one(&self, note_id: NoteId, requester: UserId, username: String) -> Result<PublicUser> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();

                access::require_owner(&tx, note_id, requester, "add collaborators")?;

                let username = username.trim();
                let user = users::find_by_username(&tx, username)?
                    .ok_or_else(|| Error::NotFound(format!("User '{username}' not found")))?;
                if user.id == requester {
                    return Err(Error::Validation("Cannot share a note with yourself".into()).into());
                }

                let exists: bool = tx.query_row(
                    "SELECT EXISTS (SELECT 1 FROM collaborators WHERE note_id = ? AND user_id = ?)",
                    [note_id, user.id],
                    |row| row.get(0),
                )?;
                if exists {
                    return Err(Error::Conflict(format!("User '{username}' is already a collaborator")).into());
                }

                tx.execute(
                    "INSERT INTO collaborators (note_id, user_id, created_at) VALUES (?, ?, ?)",
                    params![note_id, user.id, now],
                )?;
                touch(&tx, note_id, now)?;

                tx.commit()?;
                Ok(user)
            })
            .await
            .map_err(Error::from)
    }

    /// Removes exactly one link. Owner only.
    pub async fn remove_one(&self, note_id: NoteId, requester: UserId, collaborator_id: UserId) -> Result<()> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;

                access::require_owner(&tx, note_id, requester, "remove collaborators")?;

                let removed = tx.execute(
                    "DELETE FROM collaborators WHERE note_id = ? AND user_id = ?",
                    [note_id, collaborator_id],
                )?;
                if removed == 0 {
                    return Err(Error::NotFound(format!("Collaborator '{collaborator_id}' not found")).into());
                }
                touch(&tx, note_id, Utc::now())?;

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Collaborators with their public identity, most recently shared first.
    pub async fn list(&self, note_id: NoteId, requester: UserId) -> Result<Vec<Collaborator>> {
        self.db
            .call(move |conn| {
                access::require_access(conn, note_id, requester)?;

                let collaborators = conn
                    .prepare(
                        r#"SELECT u.id, u.username, u.email, c.created_at
                        FROM collaborators c
                        JOIN users u ON u.id = c.user_id
                        WHERE c.note_id = ?
                        ORDER BY c.created_at DESC, c.rowid DESC"#,
                    )?
                    .query_map([note_id], |row| {
                        Ok(Collaborator {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            email: row.get(2)?,
                            shared_at: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(collaborators)
            })
            .await
            .map_err(Error::from)
    }
}
