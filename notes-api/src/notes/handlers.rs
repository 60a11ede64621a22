use chrono::Utc;

use crate::{
    ctx::BaseParams,
    files::FileStore,
    users::{PublicUser, UserId},
    Result,
};

use super::{
    aggregate::NoteAggregator, collaborators::CollaboratorResolver, writer::NoteWriter, AddCollaboratorInput,
    Collaborator, CreateNoteInput, Removed, Note, NoteId, ReplaceNoteInput, ShareInput, ShareOutcome,
    UpdateReminderInput,
};

pub async fn find_notes(BaseParams { db, ctx }: BaseParams) -> Result<Vec<Note>> {
    let user_id = ctx.require_user_id()?;
    NoteAggregator::new(db).list_for_user(user_id).await
}

pub async fn active_reminders(BaseParams { db, ctx }: BaseParams) -> Result<Vec<Note>> {
    let user_id = ctx.require_user_id()?;
    NoteAggregator::new(db).active_reminders(user_id, Utc::now()).await
}

pub async fn create_note(input: CreateNoteInput, BaseParams { db, ctx }: BaseParams) -> Result<Note> {
    let user_id = ctx.require_user_id()?;
    let draft = input.validate(Utc::now())?;

    let note = NoteWriter::new(db).create(user_id, draft).await?;
    tracing::info!(note_id = %note.id, "created note");
    Ok(note)
}

pub async fn get_note(note_id: NoteId, BaseParams { db, ctx }: BaseParams) -> Result<Note> {
    let user_id = ctx.require_user_id()?;
    NoteAggregator::new(db).get_visible(note_id, user_id).await
}

pub async fn replace_note(
    note_id: NoteId,
    input: ReplaceNoteInput,
    files: &FileStore,
    BaseParams { db, ctx }: BaseParams,
) -> Result<Note> {
    let user_id = ctx.require_user_id()?;
    let draft = input.validate(Utc::now())?;

    let replaced = NoteWriter::new(db).replace(note_id, user_id, draft).await?;
    files.remove_all(&replaced.orphaned).await;

    Ok(replaced.note)
}

pub async fn update_reminder(
    note_id: NoteId,
    input: UpdateReminderInput,
    BaseParams { db, ctx }: BaseParams,
) -> Result<Note> {
    let user_id = ctx.require_user_id()?;
    let reminder = input.validate(Utc::now())?;

    NoteWriter::new(db).update_reminder(note_id, user_id, reminder).await
}

pub async fn delete_note(note_id: NoteId, files: &FileStore, BaseParams { db, ctx }: BaseParams) -> Result<Removed> {
    let user_id = ctx.require_user_id()?;

    let paths = NoteWriter::new(db).delete(note_id, user_id).await?;
    files.remove_all(&paths).await;

    tracing::info!(note_id = %note_id, "deleted note with {} media files", paths.len());
    Ok(Removed::new(note_id, "Note deleted successfully"))
}

pub async fn share_note(note_id: NoteId, input: ShareInput, BaseParams { db, ctx }: BaseParams) -> Result<ShareOutcome> {
    let user_id = ctx.require_user_id()?;
    CollaboratorResolver::new(db)
        .share(note_id, user_id, input.usernames())
        .await
}

pub async fn list_collaborators(note_id: NoteId, BaseParams { db, ctx }: BaseParams) -> Result<Vec<Collaborator>> {
    let user_id = ctx.require_user_id()?;
    CollaboratorResolver::new(db).list(note_id, user_id).await
}

pub async fn add_collaborator(
    note_id: NoteId,
    AddCollaboratorInput { username }: AddCollaboratorInput,
    BaseParams { db, ctx }: BaseParams,
) -> Result<PublicUser> {
    let user_id = ctx.require_user_id()?;
    CollaboratorResolver::new(db).add_one(note_id, user_id, username).await
}

pub async fn remove_collaborator(
    note_id: NoteId,
    collaborator_id: UserId,
    BaseParams { db, ctx }: BaseParams,
) -> Result<Removed> {
    let user_id = ctx.require_user_id()?;
    CollaboratorResolver::new(db)
        .remove_one(note_id, user_id, collaborator_id)
        .await?;

    Ok(Removed::new(collaborator_id, "Collaborator removed"))
}
