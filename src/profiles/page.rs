use axum::{debug_handler, extract::{Multipart, Path, State}, response::{Html, IntoResponse, Redirect, Response}};
use serde_json::json;
use tower_sessions::Session;

use crate::{AppResult, AppState, GetField, blobs::Blobs, include_res, res::{self, escape_html}, session, store::Db};

#[debug_handler(state = AppState)]
pub(crate) async fn profile(
    Path(uid): Path<String>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Response> {
    if session::current_user(&session, &db).await?.is_none() {
        return Ok(Redirect::to("/login").into_response());
    }
    let data = db.get(&format!("users/{uid}")).await?;
    if data.is_null() {
        return res::sorry("profile");
    }

    let avatar = data
        .get("avatar")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_owned();
    Ok(Html(
        include_res!(str, "/pages/profile.html")
            .replace("{username}", &escape_html(&data.get_str_field("username")?))
            .replace("{uid}", &escape_html(&uid))
            .replace("{avatar}", &escape_html(&avatar)),
    )
    .into_response())
}

/// Profile edit: a new username and/or avatar replaces `users/{uid}`
/// outright as one whole-record write.
#[debug_handler(state = AppState)]
pub(crate) async fn update(
    State(db): State<Db>,
    State(blobs): State<Blobs>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };

    let mut username = user.username.clone();
    let mut avatar = user.avatar.clone();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_owned();
        match name.as_str() {
            "username" => {
                let updated = field.text().await?;
                if !updated.is_empty() {
                    username = updated;
                }
            }
            "avatar" => {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;
                if let Some(content_type) = content_type {
                    if !bytes.is_empty() {
                        avatar = Some(
                            blobs
                                .put(&format!("users/{}", user.uid), &content_type, &bytes)
                                .await?,
                        );
                    }
                }
            }
            _ => {}
        }
    }

    db.set(
        &format!("users/{}", user.uid),
        &json!({"username": username, "avatar": avatar}),
    )
    .await?;
    Ok(Redirect::to("/lobby").into_response())
}
