use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{users::UserId, Error, Result, DB};

use super::{
    access, aggregate::{self, media_url}, Media, MediaDraft, MediaId, Note, NoteDraft, NoteId,
};

/// Result of a full replace: the new aggregate plus stored paths of media
/// the note no longer references.
#[derive(Debug, Clone)]
pub struct Replaced {
    pub note: Note,
    pub orphaned: Vec<String>,
}

impl<'a> TryFrom<&Row<'a>> for Media {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        let path: String = row.get(6)?;
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            filename: row.get(2)?,
            original_name: row.get(3)?,
            mime_type: row.get(4)?,
            file_size: row.get(5)?,
            url: media_url(&path),
            path,
        })
    }
}

const MEDIA_COLUMNS: &str = "id, kind, filename, original_name, mime_type, file_size, file_path";

fn insert_media(conn: &Connection, note_id: NoteId, media: &MediaDraft, now: DateTime<Utc>) -> rusqlite::Result<Media> {
    conn.query_row(
        &format!(
            r#"INSERT INTO media (note_id, kind, filename, original_name, mime_type, file_size, file_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {MEDIA_COLUMNS}"#
        ),
        params![
            note_id,
            media.kind,
            media.filename,
            media.original_name,
            media.mime_type,
            media.file_size,
            media.path(),
            now
        ],
        |row| Media::try_from(row),
    )
}

/// Inserts every child collection of `draft`. Checklist positions follow
/// input order; collaborator ids that are unknown or name the owner are
/// skipped.
fn insert_children(
    conn: &Connection,
    note_id: NoteId,
    owner_id: UserId,
    draft: &NoteDraft,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let mut checklist = conn.prepare(
        "INSERT INTO checklist_items (note_id, text, checked, position, created_at) VALUES (?, ?, ?, ?, ?)",
    )?;
    for (position, item) in draft.checklist.iter().enumerate() {
        checklist.execute(params![note_id, item.text, item.checked, position as i64, now])?;
    }

    let mut collaborators = conn.prepare(
        r#"INSERT OR IGNORE INTO collaborators (note_id, user_id, created_at)
        SELECT ?1, id, ?3 FROM users WHERE id = ?2 AND id != ?4"#,
    )?;
    for user_id in &draft.collaborators {
        collaborators.execute(params![note_id, user_id, now, owner_id])?;
    }

    for media in &draft.media {
        insert_media(conn, note_id, media, now)?;
    }

    Ok(())
}

fn media_paths(conn: &Connection, note_id: NoteId) -> rusqlite::Result<Vec<String>> {
    conn.prepare("SELECT file_path FROM media WHERE note_id = ? ORDER BY rowid")?
        .query_map([note_id], |row| row.get(0))?
        .collect()
}

/// Keeps the paths no media row references any more. Run after the
/// deletes, inside the same transaction, so a file attached to another
/// note is never reported.
pub(crate) fn unreferenced(conn: &Connection, paths: Vec<String>) -> rusqlite::Result<Vec<String>> {
    let mut referenced = conn.prepare("SELECT EXISTS (SELECT 1 FROM media WHERE file_path = ?)")?;

    let mut orphaned = vec![];
    for path in paths.into_iter().collect::<IndexSet<_>>() {
        if !referenced.query_row([&path], |row| row.get::<_, bool>(0))? {
            orphaned.push(path);
        }
    }
    Ok(orphaned)
}

fn delete_children(conn: &Connection, note_id: NoteId) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM checklist_items WHERE note_id = ?", [note_id])?;
    conn.execute("DELETE FROM collaborators WHERE note_id = ?", [note_id])?;
    conn.execute("DELETE FROM media WHERE note_id = ?", [note_id])?;
    Ok(())
}

pub(crate) fn touch(conn: &Connection, note_id: NoteId, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute("UPDATE notes SET updated_at = ? WHERE id = ?", params![now, note_id])?;
    Ok(())
}

/// Atomic note writes. Every operation runs in a single transaction; an
/// error anywhere drops the transaction and leaves prior state in place.
#[derive(Clone, Debug)]
pub struct NoteWriter {
    db: DB,
}

impl NoteWriter {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    pub async fn create(&self, owner_id: UserId, draft: NoteDraft) -> Result<Note> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();

                let note_id: NoteId = tx.query_row(
                    r#"INSERT INTO notes (owner_id, title, text, reminder, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    RETURNING id"#,
                    params![owner_id, draft.title, draft.text, draft.reminder, now, now],
                    |row| row.get(0),
                )?;
                insert_children(&tx, note_id, owner_id, &draft, now)?;

                let note = aggregate::load(&tx, note_id)?;
                tx.commit()?;
                Ok(note)
            })
            .await
            .map_err(Error::from)
    }

    /// Replaces scalar fields and every child collection. Owner or
    /// collaborator.
    pub async fn replace(&self, note_id: NoteId, requester: UserId, draft: NoteDraft) -> Result<Replaced> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();

                access::require_access(&tx, note_id, requester)?;
                let owner_id: UserId =
                    tx.query_row("SELECT owner_id FROM notes WHERE id = ?", [note_id], |row| row.get(0))?;
                let previous = media_paths(&tx, note_id)?;

                tx.execute(
                    "UPDATE notes SET title = ?, text = ?, reminder = ?, updated_at = ? WHERE id = ?",
                    params![draft.title, draft.text, draft.reminder, now, note_id],
                )?;
                delete_children(&tx, note_id)?;
                insert_children(&tx, note_id, owner_id, &draft, now)?;

                let orphaned = unreferenced(&tx, previous)?;
                let note = aggregate::load(&tx, note_id)?;
                tx.commit()?;
                Ok(Replaced { note, orphaned })
            })
            .await
            .map_err(Error::from)
    }

    /// Sets or clears the reminder. Children are untouched.
    pub async fn update_reminder(
        &self,
        note_id: NoteId,
        requester: UserId,
        reminder: Option<DateTime<Utc>>,
    ) -> Result<Note> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;

                access::require_access(&tx, note_id, requester)?;
                tx.execute(
                    "UPDATE notes SET reminder = ?, updated_at = ? WHERE id = ?",
                    params![reminder, Utc::now(), note_id],
                )?;

                let note = aggregate::load(&tx, note_id)?;
                tx.commit()?;
                Ok(note)
            })
            .await
            .map_err(Error::from)
    }

    /// Removes the note with all children. Owner only. Returns the stored
    /// paths of removed media that no other note still references.
    pub async fn delete(&self, note_id: NoteId, requester: UserId) -> Result<Vec<String>> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;

                access::require_owner(&tx, note_id, requester, "delete it")?;
                let paths = media_paths(&tx, note_id)?;

                delete_children(&tx, note_id)?;
                tx.execute("DELETE FROM notes WHERE id = ?", [note_id])?;
                let paths = unreferenced(&tx, paths)?;

                tx.commit()?;
                Ok(paths)
            })
            .await
            .map_err(Error::from)
    }

    /// Attaches one media entry and touches the note. Owner or collaborator.
    pub async fn add_media(&self, note_id: NoteId, requester: UserId, media: MediaDraft) -> Result<Media> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = Utc::now();

                access::require_access(&tx, note_id, requester)?;
                let media = insert_media(&tx, note_id, &media, now)?;
                touch(&tx, note_id, now)?;

                tx.commit()?;
                Ok(media)
            })
            .await
            .map_err(Error::from)
    }

    /// Detaches one media entry and touches its note. Returns the stored
    /// path when nothing else references it. Unknown media and media of
    /// inaccessible notes are not found.
    pub async fn remove_media(&self, media_id: MediaId, requester: UserId) -> Result<Option<String>> {
        self.db
            .call(move |conn| {
                let tx = conn.transaction()?;
                let not_found = || Error::NotFound(format!("Media '{media_id}' not found"));

                let (note_id, path): (NoteId, String) = tx
                    .query_row(
                        "SELECT note_id, file_path FROM media WHERE id = ?",
                        [media_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?
                    .ok_or_else(not_found)?;
                if access::role(&tx, note_id, requester)?.is_none() {
                    return Err(not_found().into());
                }

                tx.execute("DELETE FROM media WHERE id = ?", [media_id])?;
                touch(&tx, note_id, Utc::now())?;
                let path = unreferenced(&tx, vec![path])?.pop();

                tx.commit()?;
                Ok(path)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        db::init_test_db,
        notes::{aggregate::NoteAggregator, ChecklistDraft, MediaKind},
        tests::create_user,
    };

    fn draft(title: &str) -> NoteDraft {
        NoteDraft {
            title: title.into(),
            text: String::new(),
            reminder: None,
            checklist: vec![],
            collaborators: vec![],
            media: vec![],
        }
    }

    fn checklist(items: &[&str]) -> Vec<ChecklistDraft> {
        items
            .iter()
            .map(|text| ChecklistDraft {
                text: text.to_string(),
                checked: false,
            })
            .collect()
    }

    fn media(kind: MediaKind, filename: &str) -> MediaDraft {
        MediaDraft {
            kind,
            filename: filename.into(),
            original_name: filename.into(),
            mime_type: "application/octet-stream".into(),
            file_size: 1,
        }
    }

    async fn count(db: &DB, table: &'static str, note_id: NoteId) -> Result<i64> {
        db.call(move |conn| {
            conn.query_row(
                &format!("SELECT count(*) FROM {table} WHERE note_id = ?"),
                [note_id],
                |r| r.get(0),
            )
            .map_err(|e| e.into())
        })
        .await
        .map_err(Error::from)
    }

    #[tokio::test]
    async fn create_assigns_positions_in_input_order() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;

        let note = NoteWriter::new(db)
            .create(
                owner.id,
                NoteDraft {
                    checklist: checklist(&["a", "b", "c"]),
                    ..draft("list")
                },
            )
            .await?;

        assert_eq!(
            note.checklist.iter().map(|i| (i.text.as_str(), i.position)).collect::<Vec<_>>(),
            vec![("a", 0), ("b", 1), ("c", 2)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_skips_owner_and_unknown_collaborators() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let bob = create_user(&db, "bob").await?;

        let note = NoteWriter::new(db)
            .create(
                owner.id,
                NoteDraft {
                    collaborators: vec![owner.id, bob.id, uuid::Uuid::now_v7()],
                    ..draft("shared")
                },
            )
            .await?;

        assert_eq!(note.collaborators, vec![bob.id]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_create_leaves_no_note() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        db.call(|conn| {
            conn.execute_batch(
                r#"CREATE TRIGGER fail_media BEFORE INSERT ON media WHEN NEW.filename = 'boom'
                BEGIN SELECT RAISE(ABORT, 'simulated storage fault'); END;"#,
            )?;
            Ok(())
        })
        .await?;

        let result = NoteWriter::new(db.clone())
            .create(
                owner.id,
                NoteDraft {
                    checklist: checklist(&["a"]),
                    media: vec![media(MediaKind::File, "boom")],
                    ..draft("doomed")
                },
            )
            .await;
        assert!(matches!(result, Err(Error::DB(_))));

        let notes = NoteAggregator::new(db).list_for_user(owner.id).await?;
        assert!(notes.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_state() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let bob = create_user(&db, "bob").await?;
        let writer = NoteWriter::new(db.clone());

        let before = writer
            .create(
                owner.id,
                NoteDraft {
                    text: "original".into(),
                    checklist: checklist(&["keep"]),
                    collaborators: vec![bob.id],
                    media: vec![media(MediaKind::Image, "keep.png")],
                    ..draft("before")
                },
            )
            .await?;

        db.call(|conn| {
            conn.execute_batch(
                r#"CREATE TRIGGER fail_media BEFORE INSERT ON media WHEN NEW.filename = 'boom'
                BEGIN SELECT RAISE(ABORT, 'simulated storage fault'); END;"#,
            )?;
            Ok(())
        })
        .await?;

        let result = writer
            .replace(
                before.id,
                owner.id,
                NoteDraft {
                    checklist: checklist(&["x", "y"]),
                    media: vec![media(MediaKind::Image, "new.png"), media(MediaKind::File, "boom")],
                    ..draft("after")
                },
            )
            .await;
        assert!(matches!(result, Err(Error::DB(_))));

        let after = NoteAggregator::new(db).get(before.id).await?;
        assert_eq!(after, before);
        Ok(())
    }

    #[tokio::test]
    async fn replace_is_full_and_reports_orphans() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let writer = NoteWriter::new(db);

        let note = writer
            .create(
                owner.id,
                NoteDraft {
                    text: "body".into(),
                    reminder: Some(Utc::now() + Duration::days(1)),
                    checklist: checklist(&["a", "b"]),
                    media: vec![media(MediaKind::Image, "a.png"), media(MediaKind::Voice, "v.ogg")],
                    ..draft("title")
                },
            )
            .await?;

        let Replaced { note: replaced, orphaned } = writer
            .replace(
                note.id,
                owner.id,
                NoteDraft {
                    checklist: checklist(&["c"]),
                    media: vec![media(MediaKind::Image, "a.png")],
                    ..draft("renamed")
                },
            )
            .await?;

        assert_eq!(replaced.title, "renamed");
        assert_eq!(replaced.text, "");
        assert_eq!(replaced.reminder, None);
        assert_eq!(replaced.checklist.len(), 1);
        assert_eq!(replaced.checklist[0].position, 0);
        assert_eq!(replaced.images.len(), 1);
        assert!(replaced.voices.is_empty());
        assert!(replaced.updated_at >= note.updated_at);
        assert_eq!(orphaned, vec!["voices/v.ogg".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn replace_missing_note_is_not_found() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;

        let result = NoteWriter::new(db)
            .replace(uuid::Uuid::now_v7(), owner.id, draft("ghost"))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn update_reminder_keeps_children() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let writer = NoteWriter::new(db);

        let note = writer
            .create(
                owner.id,
                NoteDraft {
                    checklist: checklist(&["a"]),
                    ..draft("remind me")
                },
            )
            .await?;

        let at = Utc::now() + Duration::hours(3);
        let updated = writer.update_reminder(note.id, owner.id, Some(at)).await?;
        assert_eq!(updated.reminder, Some(at));
        assert_eq!(updated.checklist, note.checklist);

        let cleared = writer.update_reminder(note.id, owner.id, None).await?;
        assert_eq!(cleared.reminder, None);
        Ok(())
    }

    #[tokio::test]
    async fn delete_cascades_children() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let bob = create_user(&db, "bob").await?;
        let writer = NoteWriter::new(db.clone());

        let note = writer
            .create(
                owner.id,
                NoteDraft {
                    checklist: checklist(&["a", "b"]),
                    collaborators: vec![bob.id],
                    media: vec![media(MediaKind::File, "a.pdf")],
                    ..draft("doomed")
                },
            )
            .await?;

        let forbidden = writer.delete(note.id, bob.id).await;
        assert!(matches!(forbidden, Err(Error::Forbidden(_))));

        let paths = writer.delete(note.id, owner.id).await?;
        assert_eq!(paths, vec!["files/a.pdf".to_string()]);

        for table in ["checklist_items", "collaborators", "media"] {
            assert_eq!(count(&db, table, note.id).await?, 0, "{table}");
        }
        assert!(matches!(
            NoteAggregator::new(db).get(note.id).await,
            Err(Error::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn media_add_and_remove() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let stranger = create_user(&db, "stranger").await?;
        let writer = NoteWriter::new(db.clone());

        let note = writer.create(owner.id, draft("with media")).await?;

        let added = writer
            .add_media(note.id, owner.id, media(MediaKind::Voice, "memo.ogg"))
            .await?;
        assert_eq!(added.path, "voices/memo.ogg");

        let denied = writer.remove_media(added.id, stranger.id).await;
        assert!(matches!(denied, Err(Error::NotFound(_))));

        let path = writer.remove_media(added.id, owner.id).await?;
        assert_eq!(path.as_deref(), Some("voices/memo.ogg"));
        assert_eq!(count(&db, "media", note.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn shared_file_paths_are_not_reported() -> Result<()> {
        let db = init_test_db().await?;
        let owner = create_user(&db, "owner").await?;
        let other = create_user(&db, "other").await?;
        let writer = NoteWriter::new(db.clone());

        let kept = NoteDraft {
            media: vec![media(MediaKind::Image, "shared.png")],
            ..draft("kept")
        };
        writer.create(owner.id, kept.clone()).await?;
        let copy = writer.create(other.id, kept).await?;

        let Replaced { orphaned, .. } = writer.replace(copy.id, other.id, draft("emptied")).await?;
        assert!(orphaned.is_empty());

        let added = writer
            .add_media(copy.id, other.id, media(MediaKind::Image, "shared.png"))
            .await?;
        assert_eq!(writer.remove_media(added.id, other.id).await?, None);

        writer
            .add_media(copy.id, other.id, media(MediaKind::Image, "shared.png"))
            .await?;
        assert!(writer.delete(copy.id, other.id).await?.is_empty());
        Ok(())
    }
}
