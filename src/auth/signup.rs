use axum::{debug_handler, extract::{Multipart, State}, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use crate::{AppResult, AppState, blobs::Blobs, session::USER_ID, store::Db};

#[debug_handler(state = AppState)]
pub(crate) async fn signup(
    State(db): State<Db>,
    State(blobs): State<Blobs>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut username = String::new();
    let mut email = String::new();
    let mut password = String::new();
    let mut avatar: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_owned();
        match name.as_str() {
            "username" => username = field.text().await?,
            "email" => email = field.text().await?,
            "password" => password = field.text().await?,
            "avatar" => {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;
                if let Some(content_type) = content_type {
                    if !bytes.is_empty() {
                        avatar = Some((content_type, bytes.to_vec()));
                    }
                }
            }
            _ => {}
        }
    }

    let missing: Vec<(&str, String)> = [
        ("username", &username),
        ("email", &email),
        ("password", &password),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_empty())
    .map(|(at, _)| (at, "missing".to_owned()))
    .collect();
    if !missing.is_empty() {
        return Ok(Html(super::render_login(&missing)).into_response());
    }

    match super::sign_up(&db, &blobs, &username, &email, &password, avatar).await {
        Ok(uid) => {
            session.insert(USER_ID, &uid).await?;
            Ok(Redirect::to("/lobby").into_response())
        }
        Err(err) => match err.field() {
            Some(field) => Ok(Html(super::render_login(&[(field, err.to_string())])).into_response()),
            None => Err(err)?,
        },
    }
}
