use axum::{debug_handler, extract::{Path, State}, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use crate::{AppResult, AppState, include_res, res::{self, escape_html}, session, store::Db};

use super::{ChatroomData, msg::{self, MessageType, StoredMessage}};

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    Path(room_id): Path<String>,
    State(db): State<Db>,
    session: Session,
) -> AppResult<Response> {
    let Some(user) = session::current_user(&session, &db).await? else {
        return Ok(Redirect::to(&format!("/login?return_url=/r/{room_id}")).into_response());
    };

    let snapshot = db.get(&format!("chatrooms/{room_id}")).await?;
    if snapshot.is_null() {
        return res::sorry("chatroom");
    }
    // opening a room by id is how you join it
    super::join::enter_chatroom(&db, &user.uid, &room_id).await?;

    let room: ChatroomData = serde_json::from_value(db.get(&format!("chatrooms/{room_id}")).await?)?;
    let messages = msg::message_list(&db.get(&format!("chatrooms/{room_id}/messages")).await?);

    let mut members_html = String::new();
    for uid in &room.user_data {
        let username = db
            .get(&format!("users/{uid}/username"))
            .await?
            .as_str()
            .unwrap_or("?")
            .to_owned();
        members_html += &format!("<li>{}</li>", escape_html(&username));
    }

    let body = include_res!(str, "/pages/room.html")
        .replace("{room_id}", &escape_html(&room.id))
        .replace("{room_title}", &escape_html(&room.title))
        .replace("{room_description}", &escape_html(&room.description))
        .replace("{my_uid}", &escape_html(&user.uid))
        .replace("{members}", &members_html)
        .replace("{messages}", &messages_html(&user.uid, &messages));

    Ok(Html(body).into_response())
}

pub(crate) fn messages_html(my_uid: &str, messages: &[StoredMessage]) -> String {
    let mut out = String::new();
    for run in msg::group_runs(messages) {
        out += &format!(
            "<div class=\"run\"><div class=\"author\">{}</div>",
            escape_html(run.username)
        );
        for stored in run.messages {
            let mine = if stored.message.id == my_uid { " mine" } else { "" };
            let inner = match stored.message.kind {
                MessageType::Text => escape_html(&stored.message.data),
                MessageType::Image => {
                    format!("<img src=\"{}\"/>", escape_html(&stored.message.data))
                }
                MessageType::Video => format!(
                    "<video controls src=\"{}\"></video>",
                    escape_html(&stored.message.data)
                ),
            };
            out += &format!(
                "<div class=\"msg{mine}\" data-key=\"{}\">{inner}</div>",
                stored.key
            );
        }
        out += "</div>";
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::rooms::msg::Message;

    #[test]
    fn runs_render_one_author_header_each() {
        let stored = |sender: &str, key: u64| StoredMessage {
            key,
            message: Message {
                kind: MessageType::Text,
                data: format!("<{key}>"),
                id: sender.to_owned(),
                username: sender.to_owned(),
                date: Utc::now(),
                filetype: None,
            },
        };
        let html = messages_html("a", &[stored("a", 0), stored("a", 1), stored("b", 2)]);

        assert_eq!(html.matches("class=\"author\"").count(), 2);
        assert_eq!(html.matches("msg mine").count(), 2);
        // payloads are escaped
        assert!(html.contains("&lt;0&gt;"));
    }
}
