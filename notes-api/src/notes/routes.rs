use crate::{
    ctx::BaseParams,
    files::FileStore,
    openapi::{
        aide::{
            axum::{
                routing::{delete, get, patch},
                ApiRouter, IntoApiResponse,
            },
            NoApi,
        },
        Json, Path,
    },
    state::AppState,
    users::{PublicUser, UserId},
};
use axum::{extract::State, http::StatusCode};

use schemars::JsonSchema;

use serde::Deserialize;

use super::{
    handlers, AddCollaboratorInput, CreateNoteInput, Note, NoteId, ReplaceNoteInput, ShareInput, UpdateReminderInput,
};

#[derive(Debug, Deserialize, JsonSchema)]
struct NoteIdPath {
    note_id: NoteId,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CollaboratorPath {
    note_id: NoteId,
    collaborator_id: UserId,
}

pub fn router(state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/api/notes",
            get(find_notes).post_with(create_note, |t| t.response::<201, Json<Note>>()),
        )
        .api_route("/api/notes/filter/reminder", get(active_reminders))
        .api_route(
            "/api/notes/{note_id}",
            get(get_note).put(replace_note).delete(delete_note),
        )
        .api_route("/api/notes/{note_id}/share", patch(share_note))
        .api_route("/api/notes/{note_id}/reminder", patch(update_reminder))
        .api_route(
            "/api/notes/{note_id}/collaborators",
            get(list_collaborators).post_with(add_collaborator, |t| t.response::<201, Json<PublicUser>>()),
        )
        .api_route(
            "/api/notes/{note_id}/collaborators/{collaborator_id}",
            delete(remove_collaborator),
        )
        .with_state(state)
}

async fn find_notes(NoApi(base): NoApi<BaseParams>) -> impl IntoApiResponse {
    handlers::find_notes(base).await.map(Json)
}

async fn active_reminders(NoApi(base): NoApi<BaseParams>) -> impl IntoApiResponse {
    handlers::active_reminders(base).await.map(Json)
}

async fn create_note(NoApi(base): NoApi<BaseParams>, Json(args): Json<CreateNoteInput>) -> impl IntoApiResponse {
    handlers::create_note(args, base)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
}

async fn get_note(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::get_note(note_id, base).await.map(Json)
}

async fn replace_note(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    State(files): State<FileStore>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<ReplaceNoteInput>,
) -> impl IntoApiResponse {
    handlers::replace_note(note_id, args, &files, base).await.map(Json)
}

async fn delete_note(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    State(files): State<FileStore>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::delete_note(note_id, &files, base).await.map(Json)
}

async fn share_note(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<ShareInput>,
) -> impl IntoApiResponse {
    handlers::share_note(note_id, args, base).await.map(Json)
}

async fn update_reminder(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<UpdateReminderInput>,
) -> impl IntoApiResponse {
    handlers::update_reminder(note_id, args, base).await.map(Json)
}

async fn list_collaborators(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::list_collaborators(note_id, base).await.map(Json)
}

async fn add_collaborator(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<AddCollaboratorInput>,
) -> impl IntoApiResponse {
    handlers::add_collaborator(note_id, args, base)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
}

async fn remove_collaborator(
    Path(CollaboratorPath {
        note_id,
        collaborator_id,
    }): Path<CollaboratorPath>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::remove_collaborator(note_id, collaborator_id, base)
        .await
        .map(Json)
}
