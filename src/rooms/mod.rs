pub mod join;
pub mod msg;
pub mod new;
mod room;
pub mod search;
pub mod settings;
mod ws;

use axum::{Router, routing::get, routing::post};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(new::new_room))
        .route("/search", get(search::search))
        .route("/with/{uid}", post(new::room_with))
        .route("/{id}", get(room::room))
        .route("/{id}/enter", post(join::enter))
        .route("/{id}/settings", post(settings::update))
        .route("/{id}/delete", post(settings::delete))
        .route("/{id}/msg", post(msg::send))
        .route("/{id}/file", post(msg::send_file))
        .route("/{id}/msg/{key}/unsend", post(msg::unsend))
        .route("/{id}/ws", get(ws::room_ws))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatroomVisibility {
    Public,
    Private,
}

/// A room record as stored at `chatrooms/{id}`. The message log lives under
/// the same node but is read through [`msg::message_list`], not this struct;
/// unknown siblings (`messages`) are ignored on deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatroomData {
    pub id: String,
    pub visibility: ChatroomVisibility,
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        rename = "userData",
        deserialize_with = "crate::store::int_keyed::deserialize"
    )]
    pub user_data: Vec<String>,
    #[serde(
        default,
        rename = "messageCounter",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_counter: Option<u64>,
}

/// Mixed-case alphanumeric id fragment, no collision check; uniqueness is
/// probabilistic by construction.
pub fn random_id(length: usize) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let c = CHARS[rng.random_range(0..CHARS.len())] as char;
            if rng.random_bool(0.5) {
                c.to_ascii_lowercase()
            } else {
                c
            }
        })
        .collect()
}

/// Public rooms get `slug-of-title:random6`, private rooms a bare random18.
pub fn generate_id(title: &str, visibility: ChatroomVisibility) -> String {
    match visibility {
        ChatroomVisibility::Private => random_id(18),
        ChatroomVisibility::Public => format!(
            "{}:{}",
            title.replace(' ', "-").to_lowercase(),
            random_id(6)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_format_by_visibility() {
        let public = generate_id("My Cool Room", ChatroomVisibility::Public);
        let (slug, suffix) = public.split_once(':').unwrap();
        assert_eq!(slug, "my-cool-room");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));

        let private = generate_id("ignored", ChatroomVisibility::Private);
        assert_eq!(private.len(), 18);
        assert!(!private.contains(':'));
        assert!(private.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn chatroom_roundtrips_through_store_shape() {
        // userData comes back from the store as an int-keyed object
        let room: ChatroomData = serde_json::from_value(json!({
            "id": "general:aB3x9Z",
            "visibility": "public",
            "owner": "u1",
            "title": "General",
            "description": "",
            "userData": {"0": "u1", "1": "u2"},
            "messageCounter": 5,
            "messages": {"0": {"data": "hi"}}
        }))
        .unwrap();

        assert_eq!(room.user_data, ["u1", "u2"]);
        assert_eq!(room.message_counter, Some(5));
        assert_eq!(room.visibility, ChatroomVisibility::Public);

        let out = serde_json::to_value(&room).unwrap();
        assert_eq!(out["userData"], json!(["u1", "u2"]));
        assert!(out.get("messages").is_none());
    }
}
