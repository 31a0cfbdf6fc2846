use tower_sessions::Session;

use crate::{AppResult, GetField, store::Db};

pub const USER_ID: &str = "user_id";

#[derive(Debug, Clone)]
pub struct SessionUser {
    pub uid: String,
    pub username: String,
    pub avatar: Option<String>,
}

/// Resolves the signed-in user from the session cookie plus their
/// `users/{uid}` record. `None` when the session is anonymous or the
/// record is gone.
pub async fn current_user(session: &Session, db: &Db) -> AppResult<Option<SessionUser>> {
    let Some(uid) = session.get::<String>(USER_ID).await? else {
        return Ok(None);
    };
    let data = db.get(&format!("users/{uid}")).await?;
    if data.is_null() {
        return Ok(None);
    }
    Ok(Some(SessionUser {
        username: data.get_str_field("username")?,
        avatar: data
            .get("avatar")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        uid,
    }))
}
