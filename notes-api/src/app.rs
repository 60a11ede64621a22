use aide::scalar::Scalar;
use axum::{
    middleware::{self},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;

use crate::config;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    credentials::Credentials,
    ctx::with_ctx,
    db::DB,
    errors::{self, on_error, ErrorResponseDocs},
    files::FileStore,
    media, notes,
    openapi::{
        self,
        aide::axum::{routing::get as api_get, ApiRouter, IntoApiResponse},
        OpenApi,
    },
    state::AppState,
    users,
};

pub struct AppParams<Router>
where
    Router: FnOnce(AppState) -> ApiRouter,
{
    pub db: DB,
    pub credentials: Credentials,
    pub files: FileStore,
    pub router: Router,
}

/// Every documented route of the service.
pub fn routes(state: AppState) -> ApiRouter {
    ApiRouter::new()
        .merge(users::router(state.clone()))
        .merge(notes::router(state.clone()))
        .merge(media::router(state))
}

pub async fn create<R>(
    AppParams {
        db,
        credentials,
        files,
        router,
    }: AppParams<R>,
) -> errors::Result<(Router, OpenApi)>
where
    R: FnOnce(AppState) -> ApiRouter,
{
    let mut api = OpenApi::default();

    let uploads = ServeDir::new(files.root());
    let state = AppState {
        conn: db.clone(),
        credentials: credentials.clone(),
        files,
    };

    let docs_router = axum::Router::new()
        .route(
            "/__docs__",
            get(Scalar::new("/__docs__/spec.json")
                .with_title("Notes API")
                .axum_handler()),
        )
        .route("/__docs__/spec.json", get(serve_docs));

    let app = ApiRouter::new()
        .route("/__version__", get(version))
        .route("/__heartbeat__", get(heartbeat))
        .route("/__lbheartbeat__", get(lbheartbeat))
        .api_route("/api/health", api_get(health))
        .nest_service("/uploads", uploads)
        .merge(docs_router)
        .merge(router(state))
        .finish_api_with(&mut api, |t| {
            t.title("Notes").default_response::<openapi::Json<ErrorResponseDocs>>()
        })
        .layer(
            ServiceBuilder::new()
                .layer(Extension(db))
                .layer(Extension(credentials))
                .layer(Extension(Arc::new(api.clone())))
                .layer(middleware::from_fn(with_ctx))
                .layer(middleware::from_fn(on_error)),
        );

    Ok((app, api))
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Health {
    pub status: String,
    pub message: String,
}

async fn health() -> impl IntoApiResponse {
    let version = config()
        .app_version
        .clone()
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned());

    openapi::Json(Health {
        status: "OK".into(),
        message: format!("Notes API {version} is running"),
    })
}

async fn version() -> impl IntoResponse {
    let config = &config();
    Json(json!({
        "source" : config.source,
        "version": config.version,
        "commit" : config.git_commit,
        "build"  : config.pipeline_id
    }))
}

async fn heartbeat() -> impl IntoResponse {
    let mut rng = rand::thread_rng();
    let random: u32 = rng.gen_range(0..=10000);

    Json(json!({
        "status" : "ok",
        "random": random,
    }))
}

async fn lbheartbeat() -> impl IntoResponse {
    ""
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    openapi::Json(api.as_ref()).into_response()
}
