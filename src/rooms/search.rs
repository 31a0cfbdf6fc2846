use axum::{Json, debug_handler, extract::{Query, State}, response::{IntoResponse, Response}};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_sessions::Session;

use crate::{AppResult, AppState, GetField, session, store::Db};

use super::ChatroomData;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserHit {
    pub id: String,
    pub username: String,
    pub avatar: Option<String>,
}

/// A query resolves to rooms or to people, never both; the prefix decides.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "hits", rename_all = "lowercase")]
pub enum SearchOutcome {
    Rooms(Vec<ChatroomData>),
    Users(Vec<UserHit>),
}

/// Prefix dispatch over the directory:
/// `#id` exact room id (public and private), `@who` people search with the
/// caller excluded, plain text a case-insensitive title match over public
/// rooms, and the empty query the caller's joined list (not a search).
pub async fn search_rooms(db: &Db, me: &str, query: &str) -> AppResult<SearchOutcome> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(SearchOutcome::Rooms(joined_rooms(db, me).await?));
    }
    if let Some(who) = query.strip_prefix('@') {
        return Ok(SearchOutcome::Users(people_search(db, me, who).await?));
    }

    let snapshot = db.get("chatrooms").await?;
    let mut hits = Vec::new();
    let Some(rooms) = snapshot.as_object() else {
        return Ok(SearchOutcome::Rooms(hits));
    };
    for value in rooms.values() {
        let Ok(room) = serde_json::from_value::<ChatroomData>(value.clone()) else {
            continue;
        };
        let matched = match query.strip_prefix('#') {
            Some(id) => room.id == id,
            None => {
                room.visibility == super::ChatroomVisibility::Public
                    && room.title.to_lowercase().contains(&query.to_lowercase())
            }
        };
        if matched {
            hits.push(room);
        }
    }
    Ok(SearchOutcome::Rooms(hits))
}

async fn people_search(db: &Db, me: &str, who: &str) -> AppResult<Vec<UserHit>> {
    let snapshot = db.get("users").await?;
    let mut hits = Vec::new();
    let Some(users) = snapshot.as_object() else {
        return Ok(hits);
    };
    for (id, data) in users {
        if id == me {
            continue;
        }
        let username = data.get_str_field("username")?;
        if id == who || username.to_lowercase().contains(&who.to_lowercase()) {
            hits.push(UserHit {
                id: id.clone(),
                username,
                avatar: data
                    .get("avatar")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            });
        }
    }
    Ok(hits)
}

/// The caller's joined rooms, in join order. Ids whose room is gone are
/// skipped rather than surfaced.
pub async fn joined_rooms(db: &Db, uid: &str) -> AppResult<Vec<ChatroomData>> {
    let snapshot = db.get(&format!("user-joined-chatrooms/{uid}")).await?;
    let mut entries: Vec<(u64, String)> = snapshot
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.parse().ok()?, v.as_str()?.to_owned())))
                .collect()
        })
        .unwrap_or_default();
    entries.sort_by_key(|&(idx, _)| idx);

    let mut rooms = Vec::new();
    for (_, id) in entries {
        let room = db.get(&format!("chatrooms/{id}")).await?;
        if room.is_null() {
            continue;
        }
        rooms.push(serde_json::from_value(room)?);
    }
    Ok(rooms)
}

#[derive(Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn search(
    Query(SearchQuery { q }): Query<SearchQuery>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    Ok(Json(search_rooms(&db, &user.uid, &q).await?).into_response())
}
