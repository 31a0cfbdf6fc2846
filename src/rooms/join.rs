use axum::{Json, debug_handler, extract::{Path, State}, response::{IntoResponse, Response}};
use serde_json::json;
use tower_sessions::Session;

use crate::{AppResult, AppState, res, session, store::Db};

use super::ChatroomData;

/// Appends a user to a room's membership exactly once, in both indices:
/// `chatrooms/{room}/userData/{idx} = uid` and
/// `user-joined-chatrooms/{uid}/{idx} = room`. The duplicate scan and the
/// next-free-index come from the same read, and the whole append runs under
/// the store's append lock, so concurrent joiners cannot claim one slot.
///
/// Returns `false` without writing when the user is already a member.
pub async fn add_user_to_chatroom(db: &Db, user_id: &str, chatroom: &str) -> AppResult<bool> {
    let _guard = db.append_guard().await;

    let members = db.get(&format!("chatrooms/{chatroom}/userData")).await?;
    let members = members.as_object();
    if let Some(members) = members {
        if members.values().any(|v| v.as_str() == Some(user_id)) {
            return Ok(false);
        }
    }
    let user_idx = members.map_or(0, |m| m.len());
    let chat_idx = db
        .child_count(&format!("user-joined-chatrooms/{user_id}"))
        .await?;

    db.set(
        &format!("user-joined-chatrooms/{user_id}/{chat_idx}"),
        &json!(chatroom),
    )
    .await?;
    db.set(
        &format!("chatrooms/{chatroom}/userData/{user_idx}"),
        &json!(user_id),
    )
    .await?;
    Ok(true)
}

/// Entering a room already on the caller's joined list performs no writes.
pub async fn enter_chatroom(db: &Db, user_id: &str, chatroom: &str) -> AppResult<()> {
    let joined = db.get(&format!("user-joined-chatrooms/{user_id}")).await?;
    let already = joined
        .as_object()
        .is_some_and(|m| m.values().any(|v| v.as_str() == Some(chatroom)));
    if !already {
        add_user_to_chatroom(db, user_id, chatroom).await?;
    }
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn enter(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    let snapshot = db.get(&format!("chatrooms/{room_id}")).await?;
    if snapshot.is_null() {
        return res::sorry("chatroom");
    }

    enter_chatroom(&db, &user.uid, &room_id).await?;
    let room: ChatroomData = serde_json::from_value(db.get(&format!("chatrooms/{room_id}")).await?)?;
    Ok(Json(room).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    async fn fixture() -> Db {
        let db = Db::in_memory().await.unwrap();
        db.set(
            "chatrooms/general:abc123",
            &json!({
                "id": "general:abc123",
                "visibility": "public",
                "owner": "u1",
                "title": "General",
                "description": ""
            }),
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn join_appends_to_both_indices() {
        let db = fixture().await;
        assert!(add_user_to_chatroom(&db, "u1", "general:abc123").await.unwrap());
        assert!(add_user_to_chatroom(&db, "u2", "general:abc123").await.unwrap());

        assert_eq!(
            db.get("chatrooms/general:abc123/userData").await.unwrap(),
            json!({"0": "u1", "1": "u2"})
        );
        assert_eq!(
            db.get("user-joined-chatrooms/u2").await.unwrap(),
            json!({"0": "general:abc123"})
        );
    }

    #[tokio::test]
    async fn repeated_joins_leave_exactly_one_membership() {
        let db = fixture().await;
        assert!(add_user_to_chatroom(&db, "u1", "general:abc123").await.unwrap());
        for _ in 0..3 {
            assert!(!add_user_to_chatroom(&db, "u1", "general:abc123").await.unwrap());
        }

        assert_eq!(
            db.get("chatrooms/general:abc123/userData").await.unwrap(),
            json!({"0": "u1"})
        );
        assert_eq!(
            db.get("user-joined-chatrooms/u1").await.unwrap(),
            json!({"0": "general:abc123"})
        );
    }

    #[tokio::test]
    async fn concurrent_joins_never_share_a_slot() {
        let db = fixture().await;
        let mut handles = Vec::new();
        for uid in ["a", "b", "c", "d"] {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                add_user_to_chatroom(&db, uid, "general:abc123").await.unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let members = db.get("chatrooms/general:abc123/userData").await.unwrap();
        let members = members.as_object().unwrap();
        assert_eq!(members.len(), 4);
        let mut uids: Vec<&str> = members.values().filter_map(Value::as_str).collect();
        uids.sort();
        assert_eq!(uids, ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn reentry_is_idempotent() {
        let db = fixture().await;
        enter_chatroom(&db, "u1", "general:abc123").await.unwrap();
        let members_before = db.get("chatrooms/general:abc123/userData").await.unwrap();
        let joined_before = db.get("user-joined-chatrooms/u1").await.unwrap();

        enter_chatroom(&db, "u1", "general:abc123").await.unwrap();
        assert_eq!(
            db.get("chatrooms/general:abc123/userData").await.unwrap(),
            members_before
        );
        assert_eq!(db.get("user-joined-chatrooms/u1").await.unwrap(), joined_before);
    }
}
