use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::{
    config,
    ctx::BaseParams,
    files::FileStore,
    notes::{MediaId, NoteId},
    openapi::{
        aide::{
            axum::{routing::delete, ApiRouter, IntoApiResponse},
            NoApi,
        },
        Json, Path,
    },
    state::AppState,
};

use super::handlers::{self, Upload};

#[derive(Debug, Deserialize, JsonSchema)]
struct NoteIdPath {
    note_id: NoteId,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct MediaIdPath {
    media_id: MediaId,
}

pub fn router(state: AppState) -> ApiRouter {
    ApiRouter::new()
        // Multipart bodies are not described in the OpenAPI document.
        .route(
            "/api/notes/{note_id}/media",
            axum::routing::post(upload).layer(DefaultBodyLimit::max(config().max_upload_bytes)),
        )
        .api_route("/api/media/{media_id}", delete(remove_media))
        .with_state(state)
}

async fn upload(
    Path(NoteIdPath { note_id }): Path<NoteIdPath>,
    State(files): State<FileStore>,
    base: BaseParams,
    multipart: Multipart,
) -> crate::Result<impl IntoResponse> {
    let upload = Upload::from_multipart(multipart).await?;
    let media = handlers::upload(note_id, upload, &files, base).await?;

    Ok((StatusCode::CREATED, Json(media)))
}

async fn remove_media(
    Path(MediaIdPath { media_id }): Path<MediaIdPath>,
    State(files): State<FileStore>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::remove(media_id, &files, base).await.map(Json)
}
