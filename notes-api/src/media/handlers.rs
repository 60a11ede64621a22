use axum::extract::Multipart;

use crate::{
    ctx::BaseParams,
    files::FileStore,
    notes::{
        access::{self, AccessGuard},
        writer::NoteWriter,
        Media, MediaDraft, MediaId, MediaKind, NoteId, Removed,
    },
    Error, Result,
};

const FILE_FIELD: &str = "file";

/// The `file` part of an upload form.
#[derive(Debug)]
pub struct Upload {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::Validation(format!("Multipart error: {e}")))?
        {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }

            let original_name = field.file_name().unwrap_or("upload").to_owned();
            let mime_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_owned();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(format!("Read error: {e}")))?
                .to_vec();

            if bytes.is_empty() {
                return Err(Error::Validation("Uploaded file is empty".into()));
            }

            return Ok(Self {
                original_name,
                mime_type,
                bytes,
            });
        }

        Err(Error::Validation("No file uploaded".into()))
    }
}

pub async fn upload(
    note_id: NoteId,
    upload: Upload,
    files: &FileStore,
    BaseParams { db, ctx }: BaseParams,
) -> Result<Media> {
    let user_id = ctx.require_user_id()?;

    // Nothing touches the disk for notes the requester cannot see.
    if !AccessGuard::new(db.clone()).can_access(note_id, user_id).await? {
        return Err(access::not_found(note_id));
    }

    let kind = MediaKind::from_mime(&upload.mime_type);
    let stored = files.save(kind, &upload.original_name, &upload.bytes).await?;

    let draft = MediaDraft {
        kind,
        filename: stored.filename,
        original_name: upload.original_name,
        mime_type: upload.mime_type,
        file_size: upload.bytes.len() as i64,
    };

    match NoteWriter::new(db).add_media(note_id, user_id, draft).await {
        Ok(media) => {
            tracing::info!(note_id = %note_id, media_id = %media.id, "attached {}", media.path);
            Ok(media)
        }
        Err(error) => {
            files.remove(&stored.path).await;
            Err(error)
        }
    }
}

pub async fn remove(media_id: MediaId, files: &FileStore, BaseParams { db, ctx }: BaseParams) -> Result<Removed> {
    let user_id = ctx.require_user_id()?;

    if let Some(path) = NoteWriter::new(db).remove_media(media_id, user_id).await? {
        files.remove(&path).await;
    }

    Ok(Removed::new(media_id, "Media deleted successfully"))
}
