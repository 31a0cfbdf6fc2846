use axum::{Json, debug_handler, extract::{Multipart, Path, State}, response::{IntoResponse, Response}};
use tower_sessions::Session;

use crate::{AppResult, AppState, GetField, blobs::Blobs, res, session, store::Db};

use super::{ChatroomData, ChatroomVisibility, generate_id, join, random_id};

pub async fn create_chatroom(db: &Db, room: &ChatroomData, creator: &str) -> AppResult<()> {
    db.set(
        &format!("chatrooms/{}", room.id),
        &serde_json::to_value(room)?,
    )
    .await?;
    join::add_user_to_chatroom(db, creator, &room.id).await?;
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(db): State<Db>,
    State(blobs): State<Blobs>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };

    let mut title = String::new();
    let mut description = String::new();
    let mut visibility = ChatroomVisibility::Public;
    let mut icon: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_owned();
        match name.as_str() {
            "title" => title = field.text().await?,
            "description" => description = field.text().await?,
            "visibility" => {
                visibility = match field.text().await?.as_str() {
                    "private" => ChatroomVisibility::Private,
                    _ => ChatroomVisibility::Public,
                }
            }
            "icon" => {
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await?;
                if let Some(content_type) = content_type {
                    if !bytes.is_empty() {
                        icon = Some((content_type, bytes.to_vec()));
                    }
                }
            }
            _ => {}
        }
    }
    if title.is_empty() {
        return Err("a chatroom needs a title")?;
    }

    let id = generate_id(&title, visibility);
    let image = match icon {
        Some((content_type, bytes)) => Some(
            blobs
                .put(&format!("chatrooms/{id}/icon"), &content_type, &bytes)
                .await?,
        ),
        None => None,
    };

    let room = ChatroomData {
        id,
        visibility,
        owner: user.uid.clone(),
        title,
        description,
        image,
        user_data: Vec::new(),
        message_counter: None,
    };
    create_chatroom(&db, &room, &user.uid).await?;
    tracing::info!("chatroom {} created by u/{}", room.id, user.uid);

    let fresh: ChatroomData =
        serde_json::from_value(db.get(&format!("chatrooms/{}", room.id)).await?)?;
    Ok(Json(fresh).into_response())
}

/// People-search result clicked: spin up a private room shared with the
/// friend, join both sides, and hand the room back.
#[debug_handler(state = AppState)]
pub(crate) async fn room_with(
    Path(friend_id): Path<String>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    if friend_id == user.uid {
        return Err("cannot open a chatroom with yourself")?;
    }
    let friend = db.get(&format!("users/{friend_id}")).await?;
    if friend.is_null() {
        return res::sorry("user");
    }

    let room = ChatroomData {
        id: random_id(18),
        visibility: ChatroomVisibility::Private,
        owner: user.uid.clone(),
        title: format!(
            "Chatroom with {} and {}",
            friend.get_str_field("username")?,
            user.username
        ),
        description: String::new(),
        image: friend
            .get("avatar")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        user_data: Vec::new(),
        message_counter: None,
    };
    create_chatroom(&db, &room, &user.uid).await?;
    join::add_user_to_chatroom(&db, &friend_id, &room.id).await?;

    let fresh: ChatroomData =
        serde_json::from_value(db.get(&format!("chatrooms/{}", room.id)).await?)?;
    Ok(Json(fresh).into_response())
}
