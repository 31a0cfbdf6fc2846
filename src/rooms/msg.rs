use axum::{Json, debug_handler, extract::{Multipart, Path, State}};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_sessions::Session;

use crate::{AppResult, AppState, blobs::Blobs, session::{self, SessionUser}, store::Db};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Text = 0,
    Image = 1,
    Video = 2,
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(raw: u8) -> Result<MessageType, String> {
        match raw {
            0 => Ok(MessageType::Text),
            1 => Ok(MessageType::Image),
            2 => Ok(MessageType::Video),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// One entry of a room's append-only message log, stored at
/// `chatrooms/{room}/messages/{idx}`. Never mutated once written; `data` is
/// the text payload or the blob URL for media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: String,
    pub id: String,
    pub username: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filetype: Option<String>,
}

/// A message with the integer key it sits under, as read back from a
/// snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub key: u64,
    #[serde(flatten)]
    pub message: Message,
}

pub async fn send_msg(db: &Db, user: &SessionUser, room_id: &str, content: String) -> AppResult<u64> {
    let idx = db.allocate_index(&format!("chatrooms/{room_id}")).await?;
    let message = Message {
        kind: MessageType::Text,
        data: content,
        id: user.uid.clone(),
        username: user.username.clone(),
        date: Utc::now(),
        filetype: None,
    };
    db.set(
        &format!("chatrooms/{room_id}/messages/{idx}"),
        &serde_json::to_value(&message)?,
    )
    .await?;
    Ok(idx)
}

/// Media path: the blob goes up first at the path derived from the claimed
/// index, then the message record referencing its URL. A failed record
/// write after upload orphans the blob; there is no compensation.
pub async fn send_file_msg(
    db: &Db,
    blobs: &Blobs,
    user: &SessionUser,
    room_id: &str,
    kind: MessageType,
    filetype: String,
    data: &[u8],
) -> AppResult<u64> {
    let idx = db.allocate_index(&format!("chatrooms/{room_id}")).await?;
    let url = blobs
        .put(&format!("chatrooms/{room_id}/messages/{idx}"), &filetype, data)
        .await?;
    let message = Message {
        kind,
        data: url,
        id: user.uid.clone(),
        username: user.username.clone(),
        date: Utc::now(),
        filetype: Some(filetype),
    };
    db.set(
        &format!("chatrooms/{room_id}/messages/{idx}"),
        &serde_json::to_value(&message)?,
    )
    .await?;
    Ok(idx)
}

/// Deletes a message by its stored key; only the author may. `false` when
/// the key no longer exists.
pub async fn unsend_msg(db: &Db, user_id: &str, room_id: &str, key: u64) -> AppResult<bool> {
    let path = format!("chatrooms/{room_id}/messages/{key}");
    let stored = db.get(&path).await?;
    if stored.is_null() {
        return Ok(false);
    }
    if stored.get("id").and_then(Value::as_str) != Some(user_id) {
        return Err("only the author can unsend a message")?;
    }
    db.remove(&path).await?;
    Ok(true)
}

/// Rebuilds the ordered message list from a `messages` snapshot. Keys sort
/// numerically; entries that fail to parse are skipped rather than sinking
/// the whole list.
pub fn message_list(snapshot: &Value) -> Vec<StoredMessage> {
    let Some(map) = snapshot.as_object() else {
        return Vec::new();
    };
    let mut list: Vec<StoredMessage> = map
        .iter()
        .filter_map(|(key, value)| {
            let key = key.parse().ok()?;
            match serde_json::from_value(value.clone()) {
                Ok(message) => Some(StoredMessage { key, message }),
                Err(err) => {
                    tracing::warn!("skipping malformed message {key}: {err}");
                    None
                }
            }
        })
        .collect();
    list.sort_by_key(|m| m.key);
    list
}

/// Consecutive messages from one sender render as one run, avatar and
/// username shown once. A run breaks exactly where the sender changes.
#[derive(Debug)]
pub struct MessageRun<'a> {
    pub sender: &'a str,
    pub username: &'a str,
    pub messages: Vec<&'a StoredMessage>,
}

pub fn group_runs(messages: &[StoredMessage]) -> Vec<MessageRun<'_>> {
    let mut runs: Vec<MessageRun> = Vec::new();
    for stored in messages {
        match runs.last_mut() {
            Some(run) if run.sender == stored.message.id => run.messages.push(stored),
            _ => runs.push(MessageRun {
                sender: &stored.message.id,
                username: &stored.message.username,
                messages: vec![stored],
            }),
        }
    }
    runs
}

#[derive(Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) content: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    session: Session,
    Json(SendMessageQuery { content }): Json<SendMessageQuery>,
) -> AppResult<Json<Value>> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    if db.get(&format!("chatrooms/{room_id}/title")).await?.is_null() {
        return Err("no such chatroom")?;
    }
    let key = send_msg(&db, &user, &room_id, content).await?;
    Ok(Json(json!({"key": key})))
}

#[debug_handler(state = AppState)]
pub(crate) async fn send_file(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    State(blobs): State<Blobs>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    if db.get(&format!("chatrooms/{room_id}/title")).await?.is_null() {
        return Err("no such chatroom")?;
    }

    let mut kind = MessageType::Image;
    let mut file: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_owned();
        match name.as_str() {
            "type" => {
                kind = field.text().await?.parse::<u8>()
                    .map_err(|e| e.to_string())?
                    .try_into()?;
            }
            "file" => {
                let content_type = field
                    .content_type()
                    .ok_or("file field without content type")?
                    .to_owned();
                file = Some((content_type, field.bytes().await?.to_vec()));
            }
            _ => {}
        }
    }
    let Some((filetype, data)) = file else {
        return Err("no file attached")?;
    };

    let key = send_file_msg(&db, &blobs, &user, &room_id, kind, filetype, &data).await?;
    Ok(Json(json!({"key": key})))
}

#[debug_handler(state = AppState)]
pub(crate) async fn unsend(
    Path((room_id, key)): Path<(String, u64)>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Json<Value>> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    let removed = unsend_msg(&db, &user.uid, &room_id, key).await?;
    Ok(Json(json!({"removed": removed})))
}
