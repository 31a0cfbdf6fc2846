use axum::{debug_handler, extract::{Path, State, WebSocketUpgrade}, response::{IntoResponse, Response}};
use futures_util::{SinkExt, StreamExt};
use tower_sessions::Session;

use crate::{AppResult, AppState, session, store::Db};

use super::msg::{self, SendMessageQuery};

/// Live feed for one room: every snapshot of the message log goes out as
/// the full re-serialised list, and inbound frames are message sends. The
/// store subscription dies with the socket.
#[debug_handler(state = AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Err("not signed in")?;
    };
    if db.get(&format!("chatrooms/{room_id}/title")).await?.is_null() {
        return Err("no such chatroom")?;
    }
    let mut sub = db.subscribe(&format!("chatrooms/{room_id}/messages")).await?;

    Ok(ws
        .on_upgrade(async move |stream| {
            let (mut sender, mut receiver) = stream.split();

            let mut push_task = tokio::spawn(async move {
                while let Some(snapshot) = sub.recv().await {
                    let list = msg::message_list(&snapshot);
                    let Ok(payload) = serde_json::to_string(&list) else {
                        break;
                    };
                    if sender.send(payload.into()).await.is_err() {
                        break;
                    }
                }
            });

            while let Some(Ok(frame)) = receiver.next().await {
                let Ok(SendMessageQuery { content }) = serde_json::from_slice(&frame.into_data())
                else {
                    continue;
                };
                if let Err(err) = msg::send_msg(&db, &user, &room_id, content).await {
                    tracing::warn!("message send failed in {room_id}: {:#}", err.0);
                }
            }

            push_task.abort();
            let _ = (&mut push_task).await;
        })
        .into_response())
}
