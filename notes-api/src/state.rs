use axum::extract::FromRef;

use crate::{credentials::Credentials, db::DB, files::FileStore};

#[derive(FromRef, Clone)]
pub struct AppState {
    pub conn: DB,
    pub credentials: Credentials,
    pub files: FileStore,
}
