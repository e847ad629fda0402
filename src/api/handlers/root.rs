use axum::{Json, response::IntoResponse};
use serde::Serialize;

#[derive(Serialize, Debug)]
struct Banner {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    docs: &'static str,
}

pub async fn root() -> impl IntoResponse {
    Json(Banner {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: env!("CARGO_PKG_DESCRIPTION"),
        docs: "/docs",
    })
}
