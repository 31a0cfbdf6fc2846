use std::collections::HashSet;

use axum::{debug_handler, extract::{State, WebSocketUpgrade}, response::{IntoResponse, Response}};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tower_sessions::Session;

use crate::{AppResult, AppState, rooms::msg::{self, MessageType}, session, store::Db};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub room: String,
    pub from: String,
    pub summary: String,
}

/// Watches every room on a user's joined list and emits a [`Notification`]
/// per genuinely new message. The first snapshot a room watcher receives is
/// the initial catch-up and is swallowed whole; messages authored by the
/// watched user are suppressed too. Rooms joined later are picked up from
/// the joined-list subscription. Dropping the dispatcher tears every
/// watcher down.
pub struct Dispatcher {
    rx: mpsc::Receiver<Notification>,
    root: JoinHandle<()>,
}

impl Dispatcher {
    pub async fn watch(db: &Db, uid: &str) -> AppResult<Dispatcher> {
        let mut joined = db
            .subscribe(&format!("user-joined-chatrooms/{uid}"))
            .await?;
        let (tx, rx) = mpsc::channel(32);
        let db = db.clone();
        let uid = uid.to_owned();

        let root = tokio::spawn(async move {
            let mut known: HashSet<String> = HashSet::new();
            let mut watchers = JoinSet::new();
            while let Some(snapshot) = joined.recv().await {
                let Some(rooms) = snapshot.as_object() else {
                    continue;
                };
                for room_id in rooms.values().filter_map(|v| v.as_str()) {
                    if !known.insert(room_id.to_owned()) {
                        continue;
                    }
                    watchers.spawn(watch_room(
                        db.clone(),
                        uid.clone(),
                        room_id.to_owned(),
                        tx.clone(),
                    ));
                }
            }
        });

        Ok(Dispatcher { rx, root })
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // the JoinSet of room watchers lives inside the root task
        self.root.abort();
    }
}

async fn watch_room(db: Db, uid: String, room_id: String, tx: mpsc::Sender<Notification>) {
    let room = db
        .get(&format!("chatrooms/{room_id}/title"))
        .await
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| room_id.clone());
    let Ok(mut sub) = db.subscribe(&format!("chatrooms/{room_id}/messages")).await else {
        return;
    };

    // None until the initial catch-up snapshot has been swallowed
    let mut seen: Option<HashSet<u64>> = None;
    while let Some(snapshot) = sub.recv().await {
        let list = msg::message_list(&snapshot);
        match &mut seen {
            None => seen = Some(list.iter().map(|m| m.key).collect()),
            Some(seen) => {
                for stored in &list {
                    if !seen.insert(stored.key) || stored.message.id == uid {
                        continue;
                    }
                    let notification = Notification {
                        room: room.clone(),
                        from: stored.message.username.clone(),
                        summary: summary(&stored.message),
                    };
                    if tx.send(notification).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn summary(message: &msg::Message) -> String {
    match message.kind {
        MessageType::Text => message.data.clone(),
        MessageType::Image => "sent an image".to_owned(),
        MessageType::Video => "sent a video".to_owned(),
    }
}

#[debug_handler(state = AppState)]
pub async fn notify_ws(
    State(db): State<Db>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    let mut dispatcher = Dispatcher::watch(&db, &user.uid).await?;

    Ok(ws
        .on_upgrade(async move |mut stream| {
            while let Some(notification) = dispatcher.recv().await {
                let Ok(payload) = serde_json::to_string(&notification) else {
                    break;
                };
                if stream.send(payload.into()).await.is_err() {
                    break;
                }
            }
        })
        .into_response())
}
