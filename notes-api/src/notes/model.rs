use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use indexmap::IndexSet;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{users::UserId, Error, Result};

pub type NoteId = Uuid;
pub type MediaId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    File,
    Voice,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::File => "file",
            Self::Voice => "voice",
        }
    }

    /// Directory under the uploads root.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::File => "files",
            Self::Voice => "voices",
        }
    }

    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else if mime_type.starts_with("audio/") {
            Self::Voice
        } else {
            Self::File
        }
    }
}

impl FromSql for MediaKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "voice" => Ok(Self::Voice),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for MediaKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

// Aggregate

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub text: String,
    pub checked: bool,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Media {
    pub id: MediaId,
    pub kind: MediaKind,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub file_size: i64,
    /// Relative to the uploads root, `{kind}s/{filename}`.
    pub path: String,
    pub url: String,
}

/// A note with all of its child collections.
///
/// Collections are always present; a note without children of a kind
/// carries an empty list for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: UserId,
    pub owner_name: String,
    pub title: String,
    pub text: String,
    pub reminder: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub checklist: Vec<ChecklistItem>,
    pub collaborators: Vec<UserId>,
    pub images: Vec<Media>,
    pub files: Vec<Media>,
    pub voices: Vec<Media>,
}

impl Note {
    pub fn media(&self) -> impl Iterator<Item = &Media> {
        self.images.iter().chain(&self.files).chain(&self.voices)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Collaborator {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub shared_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    Owner,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedUsername {
    pub username: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShareOutcome {
    pub note: Note,
    pub added: Vec<String>,
    pub skipped: Vec<SkippedUsername>,
}

/// Acknowledges a removal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Removed {
    pub id: Uuid,
    pub message: String,
}

impl Removed {
    pub fn new(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

// Inputs

/// When a reminder fires. Accepts epoch milliseconds, a UTC date and time
/// pair, or an RFC 3339 string.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ReminderInput {
    Timestamp { timestamp: i64 },
    DateTime { date: String, time: String },
    Text(String),
}

impl ReminderInput {
    /// `None` when the descriptor does not name a valid instant.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp { timestamp } => Utc.timestamp_millis_opt(*timestamp).single(),
            Self::DateTime { date, time } => {
                let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
                let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M"))
                    .ok()?;
                Some(NaiveDateTime::new(date, time).and_utc())
            }
            Self::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Resolves an optional descriptor against `now`; unparseable or past
/// instants are reported through `reject`.
pub fn resolve_reminder(
    reminder: Option<&ReminderInput>,
    now: DateTime<Utc>,
    reject: fn(String) -> Error,
) -> Result<Option<DateTime<Utc>>> {
    let Some(reminder) = reminder else {
        return Ok(None);
    };

    match reminder.resolve() {
        None => Err(reject("Invalid reminder date/time format".into())),
        Some(at) if at <= now => Err(reject("Reminder cannot be in the past".into())),
        Some(at) => Ok(Some(at)),
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChecklistItemInput {
    pub text: String,
    #[serde(default)]
    pub checked: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MediaInput {
    /// Stored filename under the kind's directory.
    pub filename: String,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct CreateNoteInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    pub reminder: Option<ReminderInput>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItemInput>,
    #[serde(default)]
    pub collaborators: Vec<UserId>,
    #[serde(default)]
    pub images: Vec<MediaInput>,
    #[serde(default)]
    pub files: Vec<MediaInput>,
    #[serde(default)]
    pub voices: Vec<MediaInput>,
}

/// Full replacement of a note: omitted fields become empty.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ReplaceNoteInput(pub CreateNoteInput);

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ShareInput {
    #[serde(default)]
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateReminderInput {
    pub reminder: Option<ReminderInput>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AddCollaboratorInput {
    pub username: String,
}

// Validated values

#[derive(Debug, Clone, PartialEq)]
pub struct ChecklistDraft {
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaDraft {
    pub kind: MediaKind,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub file_size: i64,
}

impl MediaDraft {
    pub fn path(&self) -> String {
        format!("{}/{}", self.kind.plural(), self.filename)
    }
}

/// Note content that passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDraft {
    pub title: String,
    pub text: String,
    pub reminder: Option<DateTime<Utc>>,
    pub checklist: Vec<ChecklistDraft>,
    pub collaborators: Vec<UserId>,
    pub media: Vec<MediaDraft>,
}

fn media_drafts(kind: MediaKind, inputs: Vec<MediaInput>) -> Result<Vec<MediaDraft>> {
    inputs
        .into_iter()
        .map(|input| {
            let filename = input.filename.trim().to_owned();
            if filename.is_empty() || filename.contains('/') || filename.contains('\\') || filename.starts_with('.') {
                return Err(Error::Validation(format!("Invalid {} filename", kind.as_str())));
            }

            Ok(MediaDraft {
                kind,
                original_name: input.original_name.unwrap_or_else(|| filename.clone()),
                mime_type: input
                    .mime_type
                    .unwrap_or_else(|| "application/octet-stream".into()),
                file_size: input.size.unwrap_or_default().max(0),
                filename,
            })
        })
        .collect()
}

impl CreateNoteInput {
    pub fn validate(self, now: DateTime<Utc>) -> Result<NoteDraft> {
        if self.title.trim().is_empty() && self.text.trim().is_empty() {
            return Err(Error::Validation("Title or text is required".into()));
        }

        let reminder = resolve_reminder(self.reminder.as_ref(), now, Error::Validation)?;

        let checklist = self
            .checklist
            .into_iter()
            .map(|item| ChecklistDraft {
                text: item.text,
                checked: item.checked,
            })
            .collect();

        let collaborators = self
            .collaborators
            .into_iter()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();

        let mut media = media_drafts(MediaKind::Image, self.images)?;
        media.extend(media_drafts(MediaKind::File, self.files)?);
        media.extend(media_drafts(MediaKind::Voice, self.voices)?);

        Ok(NoteDraft {
            title: self.title,
            text: self.text,
            reminder,
            checklist,
            collaborators,
            media,
        })
    }
}

impl ReplaceNoteInput {
    pub fn validate(self, now: DateTime<Utc>) -> Result<NoteDraft> {
        self.0.validate(now)
    }
}

impl ShareInput {
    /// Trimmed usernames in request order, blanks dropped.
    pub fn usernames(self) -> Vec<String> {
        self.usernames
            .into_iter()
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty())
            .collect()
    }
}

impl UpdateReminderInput {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        resolve_reminder(self.reminder.as_ref(), now, Error::RejectedReminder)
    }
}
