pub mod access;
pub mod aggregate;
pub mod collaborators;
mod handlers;
mod model;
mod routes;
pub mod writer;

pub use model::*;

use crate::{openapi::aide::axum::ApiRouter, state::AppState};

pub fn router(state: AppState) -> ApiRouter {
    ApiRouter::new().merge(routes::router(state.clone()))
}
