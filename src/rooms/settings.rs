use axum::{Json, debug_handler, extract::{Multipart, Path, State}, response::{IntoResponse, Response}};
use serde_json::json;
use tower_sessions::Session;

use crate::{AppResult, AppState, blobs::Blobs, res, session, store::Db};

/// Owner-side room deletion. Sweeps every user's joined list for the room
/// id, drops the room's blobs (failures only logged, the deletion goes on),
/// then removes the `chatrooms/{id}` node wholesale. The room-side
/// `userData` needs no separate pruning: it is destroyed with the node, so
/// the membership invariant cannot be left dangling from the room side.
pub async fn delete_chatroom(db: &Db, blobs: &Blobs, room_id: &str) -> AppResult<()> {
    let joined = db.get("user-joined-chatrooms").await?;
    if let Some(users) = joined.as_object() {
        for (uid, rooms) in users {
            let Some(rooms) = rooms.as_object() else {
                continue;
            };
            for (idx, value) in rooms {
                if value.as_str() == Some(room_id) {
                    db.remove(&format!("user-joined-chatrooms/{uid}/{idx}")).await?;
                }
            }
        }
    }

    if let Err(err) = blobs.remove_prefix(&format!("chatrooms/{room_id}")).await {
        tracing::warn!("leaving orphaned blobs for {room_id}: {:#}", err.0);
    }
    db.remove(&format!("chatrooms/{room_id}")).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    State(blobs): State<Blobs>,
    session: Session,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    let owner = db.get(&format!("chatrooms/{room_id}/owner")).await?;
    if owner.is_null() {
        return res::sorry("chatroom");
    }
    if owner.as_str() != Some(user.uid.as_str()) {
        return Err("only the owner can delete a chatroom")?;
    }

    delete_chatroom(&db, &blobs, &room_id).await?;
    tracing::info!("chatroom {room_id} deleted by u/{}", user.uid);
    Ok(Json(json!({"deleted": true})).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn update(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    State(blobs): State<Blobs>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    let owner = db.get(&format!("chatrooms/{room_id}/owner")).await?;
    if owner.is_null() {
        return res::sorry("chatroom");
    }
    if owner.as_str() != Some(user.uid.as_str()) {
        return Err("only the owner can edit a chatroom")?;
    }

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_owned();
        match name.as_str() {
            "title" => {
                let title = field.text().await?;
                if !title.is_empty() {
                    db.set(&format!("chatrooms/{room_id}/title"), &json!(title)).await?;
                }
            }
            "description" => {
                let description = field.text().await?;
                db.set(&format!("chatrooms/{room_id}/description"), &json!(description))
                    .await?;
            }
            "icon" => {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;
                if let Some(content_type) = content_type {
                    if !bytes.is_empty() {
                        let url = blobs
                            .put(&format!("chatrooms/{room_id}/icon"), &content_type, &bytes)
                            .await?;
                        db.set(&format!("chatrooms/{room_id}/image"), &json!(url)).await?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(Json(json!({"updated": true})).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::join;
    use serde_json::Value;

    #[tokio::test]
    async fn deletion_cascades_through_every_joined_list() {
        let db = Db::in_memory().await.unwrap();
        let blobs = Blobs::new(db.pool().clone());
        for id in ["doomed:abc123", "keeper:def456"] {
            db.set(
                &format!("chatrooms/{id}"),
                &json!({"id": id, "visibility": "public", "owner": "u1", "title": id}),
            )
            .await
            .unwrap();
        }
        for uid in ["u1", "u2", "u3"] {
            join::add_user_to_chatroom(&db, uid, "doomed:abc123").await.unwrap();
        }
        join::add_user_to_chatroom(&db, "u2", "keeper:def456").await.unwrap();
        blobs.put("chatrooms/doomed:abc123/icon", "image/png", b"x").await.unwrap();

        delete_chatroom(&db, &blobs, "doomed:abc123").await.unwrap();

        // gone from every member's joined list, and from the directory
        for uid in ["u1", "u2", "u3"] {
            let joined = db.get(&format!("user-joined-chatrooms/{uid}")).await.unwrap();
            let leaked = joined
                .as_object()
                .is_some_and(|m| m.values().any(|v| v.as_str() == Some("doomed:abc123")));
            assert!(!leaked, "{uid} still lists the deleted room");
        }
        // the room node goes wholesale, membership list included
        assert_eq!(db.get("chatrooms/doomed:abc123").await.unwrap(), Value::Null);
        assert!(blobs.get("chatrooms/doomed:abc123/icon").await.unwrap().is_none());

        // unrelated membership survives
        assert_eq!(
            db.get("user-joined-chatrooms/u2/1").await.unwrap(),
            json!("keeper:def456")
        );
    }
}
