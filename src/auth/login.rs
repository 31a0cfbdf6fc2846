use axum::{Form, debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{AppResult, AppState, session::USER_ID, store::Db};

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    email: String,
    password: String,
}

#[debug_handler]
pub(crate) async fn login_page() -> impl IntoResponse {
    Html(super::render_login(&[]))
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(db): State<Db>,
    session: Session,
    Form(LoginForm { email, password }): Form<LoginForm>,
) -> AppResult<Response> {
    match super::sign_in(&db, &email, &password).await {
        Ok(uid) => {
            session.insert(USER_ID, &uid).await?;
            tracing::info!("welcome back u/{uid}");
            Ok(Redirect::to("/lobby").into_response())
        }
        Err(err) => match err.field() {
            Some(field) => Ok(Html(super::render_login(&[(field, err.to_string())])).into_response()),
            None => Err(err)?,
        },
    }
}
