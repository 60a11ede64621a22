mod config;

mod app;
mod credentials;
mod ctx;
mod db;
mod errors;
mod files;
mod logging;
mod media;
mod notes;
mod openapi;
mod state;
mod users;

use std::net::SocketAddr;

use app::AppParams;
pub use config::config;
use credentials::Credentials;
pub use db::{init_db, DB};
pub use errors::{Error, Result};
use files::FileStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> errors::Result<()> {
    let config = config();

    logging::setup_tracing(config.log_json, config.tokio_console);

    let conn = init_db().await?;
    let credentials = Credentials::from_config();

    if config.seed_demo {
        users::handlers::seed_demo_user(conn.clone(), &credentials).await?;
    }

    let (app, _api) = app::create(AppParams {
        db: conn,
        credentials,
        files: FileStore::from_config(),
        router: app::routes,
    })
    .await?;

    let app = logging::add_tracing_layer(app);

    let port = config.port;
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| Error::Unexpected(format!("Failed to bind port {port}: {e}")))?;

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on http://{addr}");
    }

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| Error::Unexpected(e.to_string()))?;

    Ok(())
}
