mod page;

use axum::{Router, routing::get, routing::post};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", post(page::update))
        .route("/{uid}", get(page::profile))
}
