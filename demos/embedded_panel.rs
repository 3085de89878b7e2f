//! Embed the control panel in your own axum app, next to your own routes.
//!
//! Run with:
//! ```sh
//! cargo run --example embedded_panel --features axum
//! ```
//!
//! Then:
//!   curl -X POST http://localhost:3000/blockclock/start
//!   curl http://localhost:3000/blockclock/monitoring_status

use std::sync::Arc;

use axum::{routing::get, Router};
use blockclock_rotate::panel::{router, Panel};
use blockclock_rotate::HttpDeviceClient;

#[tokio::main]
async fn main() -> Result<(), blockclock_rotate::Error> {
    tracing_subscriber::fmt().with_target(false).init();

    let panel = Arc::new(Panel::new(
        HttpDeviceClient::new(),
        "config/blockclock.yaml",
    ));

    let app = Router::new()
        .route("/", get(|| async { "Hello from the host app" }))
        .nest("/blockclock", router(panel));

    println!("Listening on http://localhost:3000");
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    axum::serve(listener, app).await?;
    Ok(())
}
