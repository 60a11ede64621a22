use axum::{extract::State, http::StatusCode};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::{
    credentials::Credentials,
    ctx::BaseParams,
    files::FileStore,
    notes::Removed,
    openapi::{
        aide::{
            axum::{
                routing::{get, post, post_with},
                ApiRouter, IntoApiResponse,
            },
            NoApi,
        },
        Json, Path, Query,
    },
    state::AppState,
};

use super::{
    handlers::{self, AuthResponse, LoginInput, RegisterInput, SearchQuery, UpdateUserInput},
    UserId,
};

#[derive(Debug, Deserialize, JsonSchema)]
struct UserIdPath {
    user_id: UserId,
}

pub fn router(state: AppState) -> ApiRouter {
    ApiRouter::new()
        .api_route(
            "/api/auth/register",
            post_with(register, |t| t.response::<201, Json<AuthResponse>>()),
        )
        .api_route("/api/auth/login", post(login))
        .api_route("/api/auth/profile", get(profile))
        .api_route("/api/users", get(list_users))
        .api_route("/api/users/search", get(search_users))
        .api_route(
            "/api/users/{user_id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .with_state(state)
}

async fn register(
    State(credentials): State<Credentials>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<RegisterInput>,
) -> impl IntoApiResponse {
    handlers::register(args, base.db, &credentials)
        .await
        .map(|r| (StatusCode::CREATED, Json(r)))
}

async fn login(
    State(credentials): State<Credentials>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<LoginInput>,
) -> impl IntoApiResponse {
    handlers::login(args, base.db, &credentials).await.map(Json)
}

async fn profile(NoApi(base): NoApi<BaseParams>) -> impl IntoApiResponse {
    handlers::profile(base).await.map(Json)
}

async fn list_users(NoApi(base): NoApi<BaseParams>) -> impl IntoApiResponse {
    handlers::list_users(base).await.map(Json)
}

async fn search_users(
    Query(args): Query<SearchQuery>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::search_users(args, base).await.map(Json)
}

async fn get_user(
    Path(UserIdPath { user_id }): Path<UserIdPath>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    handlers::get_user_by_id(user_id, base).await.map(Json)
}

async fn update_user(
    Path(UserIdPath { user_id }): Path<UserIdPath>,
    State(credentials): State<Credentials>,
    NoApi(base): NoApi<BaseParams>,
    Json(args): Json<UpdateUserInput>,
) -> impl IntoApiResponse {
    handlers::update_user(user_id, args, &credentials, base)
        .await
        .map(Json)
}

async fn delete_user(
    Path(UserIdPath { user_id }): Path<UserIdPath>,
    State(files): State<FileStore>,
    NoApi(base): NoApi<BaseParams>,
) -> impl IntoApiResponse {
    let paths = handlers::delete_user(user_id, base).await?;
    files.remove_all(&paths).await;

    crate::Result::Ok(Json(Removed::new(user_id, "User deleted successfully")))
}
