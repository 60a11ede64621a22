use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rusqlite::{Connection, Row};
use sea_query::{Alias, Cond, Expr, Iden, Order, Query, SelectStatement, SqliteQueryBuilder};
use sea_query_rusqlite::RusqliteBinder;
use uuid::Uuid;

use crate::{config, users::UserId, Error, Result, DB};

use super::{access, ChecklistItem, Media, MediaKind, Note, NoteId};

#[derive(Iden)]
pub enum Notes {
    Table,
    Id,
    OwnerId,
    Title,
    Text,
    Reminder,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    Username,
}

#[derive(Iden)]
pub enum ChecklistItems {
    Table,
    Id,
    NoteId,
    Text,
    Checked,
    Position,
    #[iden = "rowid"]
    RowId,
}

#[derive(Iden)]
pub enum Collaborators {
    Table,
    NoteId,
    UserId,
    #[iden = "rowid"]
    RowId,
}

#[derive(Iden)]
#[iden = "media"]
pub enum Attachments {
    Table,
    Id,
    NoteId,
    Kind,
    Filename,
    OriginalName,
    MimeType,
    FileSize,
    FilePath,
    #[iden = "rowid"]
    RowId,
}

/// Which notes an aggregate query returns.
#[derive(Debug, Clone, Copy)]
pub enum Selection {
    One(NoteId),
    /// Owned by or shared with the user, most recently updated first.
    VisibleTo(UserId),
    /// Visible notes whose reminder is after `now`, soonest first.
    ActiveReminders { user_id: UserId, now: DateTime<Utc> },
}

fn visible_to(user_id: UserId) -> Cond {
    Cond::any()
        .add(Expr::col((Notes::Table, Notes::OwnerId)).eq(user_id))
        .add(
            Expr::col((Notes::Table, Notes::Id)).in_subquery(
                Query::select()
                    .column(Collaborators::NoteId)
                    .from(Collaborators::Table)
                    .and_where(Expr::col(Collaborators::UserId).eq(user_id))
                    .to_owned(),
            ),
        )
}

fn aggregate_query(selection: Selection) -> SelectStatement {
    let mut query = Query::select();

    query
        .columns([
            (Notes::Table, Notes::Id),
            (Notes::Table, Notes::OwnerId),
        ])
        .expr_as(Expr::col((Users::Table, Users::Username)), Alias::new("owner_name"))
        .columns([
            (Notes::Table, Notes::Title),
            (Notes::Table, Notes::Text),
            (Notes::Table, Notes::Reminder),
            (Notes::Table, Notes::CreatedAt),
            (Notes::Table, Notes::UpdatedAt),
        ])
        .columns([
            (ChecklistItems::Table, ChecklistItems::Id),
            (ChecklistItems::Table, ChecklistItems::Text),
            (ChecklistItems::Table, ChecklistItems::Checked),
            (ChecklistItems::Table, ChecklistItems::Position),
            (ChecklistItems::Table, ChecklistItems::RowId),
        ])
        .columns([
            (Collaborators::Table, Collaborators::UserId),
            (Collaborators::Table, Collaborators::RowId),
        ])
        .columns([
            (Attachments::Table, Attachments::Id),
            (Attachments::Table, Attachments::Kind),
            (Attachments::Table, Attachments::Filename),
            (Attachments::Table, Attachments::OriginalName),
            (Attachments::Table, Attachments::MimeType),
            (Attachments::Table, Attachments::FileSize),
            (Attachments::Table, Attachments::FilePath),
            (Attachments::Table, Attachments::RowId),
        ])
        .from(Notes::Table)
        .inner_join(
            Users::Table,
            Expr::col((Users::Table, Users::Id)).equals((Notes::Table, Notes::OwnerId)),
        )
        .left_join(
            ChecklistItems::Table,
            Expr::col((ChecklistItems::Table, ChecklistItems::NoteId)).equals((Notes::Table, Notes::Id)),
        )
        .left_join(
            Collaborators::Table,
            Expr::col((Collaborators::Table, Collaborators::NoteId)).equals((Notes::Table, Notes::Id)),
        )
        .left_join(
            Attachments::Table,
            Expr::col((Attachments::Table, Attachments::NoteId)).equals((Notes::Table, Notes::Id)),
        );

    match selection {
        Selection::One(note_id) => {
            query.and_where(Expr::col((Notes::Table, Notes::Id)).eq(note_id));
        }
        Selection::VisibleTo(user_id) => {
            query
                .cond_where(visible_to(user_id))
                .order_by((Notes::Table, Notes::UpdatedAt), Order::Desc)
                .order_by((Notes::Table, Notes::Id), Order::Desc);
        }
        Selection::ActiveReminders { user_id, now } => {
            query
                .cond_where(visible_to(user_id))
                .and_where(Expr::col((Notes::Table, Notes::Reminder)).gt(now))
                .order_by((Notes::Table, Notes::Reminder), Order::Asc)
                .order_by((Notes::Table, Notes::Id), Order::Asc);
        }
    }

    query
}

/// One row of the joined note / checklist / collaborator / media fan-out.
struct JoinedRow {
    note: Note,
    checklist: Option<(i64, ChecklistItem)>,
    collaborator: Option<(i64, UserId)>,
    media: Option<(i64, Media)>,
}

impl<'a> TryFrom<&Row<'a>> for JoinedRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'a>) -> std::result::Result<Self, Self::Error> {
        let note = Note {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            owner_name: row.get(2)?,
            title: row.get(3)?,
            text: row.get(4)?,
            reminder: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            checklist: vec![],
            collaborators: vec![],
            images: vec![],
            files: vec![],
            voices: vec![],
        };

        let checklist = match row.get::<_, Option<Uuid>>(8)? {
            Some(id) => Some((
                row.get(12)?,
                ChecklistItem {
                    id,
                    text: row.get(9)?,
                    checked: row.get(10)?,
                    position: row.get(11)?,
                },
            )),
            None => None,
        };

        let collaborator = match row.get::<_, Option<Uuid>>(13)? {
            Some(user_id) => Some((row.get(14)?, user_id)),
            None => None,
        };

        let media = match row.get::<_, Option<Uuid>>(15)? {
            Some(id) => {
                let path: String = row.get(21)?;
                Some((
                    row.get(22)?,
                    Media {
                        id,
                        kind: row.get(16)?,
                        filename: row.get(17)?,
                        original_name: row.get(18)?,
                        mime_type: row.get(19)?,
                        file_size: row.get(20)?,
                        url: media_url(&path),
                        path,
                    },
                ))
            }
            None => None,
        };

        Ok(Self {
            note,
            checklist,
            collaborator,
            media,
        })
    }
}

pub(crate) fn media_url(path: &str) -> String {
    format!("{}/{}", config().uploads_url(), path)
}

#[derive(Default)]
struct Children {
    checklist: IndexMap<Uuid, (i64, ChecklistItem)>,
    collaborators: IndexMap<UserId, i64>,
    media: IndexMap<Uuid, (i64, Media)>,
}

/// Folds the join fan-out into one aggregate per note. Children are
/// deduplicated by id, so K checklist items, C collaborators and M media
/// rows come out exactly once each whatever the product size.
fn fold(rows: impl IntoIterator<Item = JoinedRow>) -> Vec<Note> {
    let mut notes: IndexMap<NoteId, (Note, Children)> = IndexMap::new();

    for row in rows {
        let (_, children) = notes
            .entry(row.note.id)
            .or_insert_with(|| (row.note, Children::default()));

        if let Some((rowid, item)) = row.checklist {
            children.checklist.entry(item.id).or_insert((rowid, item));
        }
        if let Some((rowid, user_id)) = row.collaborator {
            children.collaborators.entry(user_id).or_insert(rowid);
        }
        if let Some((rowid, media)) = row.media {
            children.media.entry(media.id).or_insert((rowid, media));
        }
    }

    notes
        .into_values()
        .map(|(mut note, children)| {
            let mut checklist = children.checklist.into_values().collect::<Vec<_>>();
            checklist.sort_by_key(|(rowid, item)| (item.position, *rowid));
            note.checklist = checklist.into_iter().map(|(_, item)| item).collect();

            let mut collaborators = children.collaborators.into_iter().collect::<Vec<_>>();
            collaborators.sort_by_key(|(_, rowid)| *rowid);
            note.collaborators = collaborators.into_iter().map(|(user_id, _)| user_id).collect();

            let mut media = children.media.into_values().collect::<Vec<_>>();
            media.sort_by_key(|(rowid, _)| *rowid);
            for (_, media) in media {
                match media.kind {
                    MediaKind::Image => note.images.push(media),
                    MediaKind::File => note.files.push(media),
                    MediaKind::Voice => note.voices.push(media),
                }
            }

            note
        })
        .collect()
}

pub(crate) fn load_many(conn: &Connection, selection: Selection) -> Result<Vec<Note>> {
    let (sql, values) = aggregate_query(selection).build_rusqlite(SqliteQueryBuilder);

    let rows = conn
        .prepare(&sql)?
        .query_map(&*values.as_params(), |row| JoinedRow::try_from(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(fold(rows))
}

pub(crate) fn load(conn: &Connection, note_id: NoteId) -> Result<Note> {
    load_many(conn, Selection::One(note_id))?
        .into_iter()
        .next()
        .ok_or_else(|| access::not_found(note_id))
}

/// Builds complete note aggregates.
#[derive(Clone, Debug)]
pub struct NoteAggregator {
    db: DB,
}

impl NoteAggregator {
    pub fn new(db: DB) -> Self {
        Self { db }
    }

    pub async fn get(&self, note_id: NoteId) -> Result<Note> {
        self.db
            .call(move |conn| Ok(load(conn, note_id)?))
            .await
            .map_err(Error::from)
    }

    /// The aggregate if `user_id` owns or collaborates on the note.
    pub async fn get_visible(&self, note_id: NoteId, user_id: UserId) -> Result<Note> {
        self.db
            .call(move |conn| {
                access::require_access(conn, note_id, user_id)?;
                Ok(load(conn, note_id)?)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Note>> {
        self.db
            .call(move |conn| Ok(load_many(conn, Selection::VisibleTo(user_id))?))
            .await
            .map_err(Error::from)
    }

    pub async fn active_reminders(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<Note>> {
        self.db
            .call(move |conn| Ok(load_many(conn, Selection::ActiveReminders { user_id, now })?))
            .await
            .map_err(Error::from)
    }
}
