//! End-to-end walk through the lobby flows: accounts, room creation,
//! joining, messaging, search, notifications and room deletion, all
//! through the library against one in-memory store.

use std::time::Duration;

use murmur::auth;
use murmur::blobs::Blobs;
use murmur::notify::Dispatcher;
use murmur::rooms::{
    ChatroomData, ChatroomVisibility, generate_id,
    join::{add_user_to_chatroom, enter_chatroom},
    msg::{message_list, send_msg, unsend_msg},
    new::create_chatroom,
    search::{SearchOutcome, search_rooms},
    settings::delete_chatroom,
};
use murmur::session::SessionUser;
use murmur::store::Db;

async fn signed_up(db: &Db, blobs: &Blobs, name: &str) -> SessionUser {
    let uid = auth::sign_up(
        db,
        blobs,
        name,
        &format!("{name}@example.com"),
        "hunter2",
        None,
    )
    .await
    .unwrap();
    SessionUser {
        uid,
        username: name.to_owned(),
        avatar: None,
    }
}

fn public_room(id: String, owner: &SessionUser, title: &str) -> ChatroomData {
    ChatroomData {
        id,
        visibility: ChatroomVisibility::Public,
        owner: owner.uid.clone(),
        title: title.to_owned(),
        description: String::new(),
        image: None,
        user_data: Vec::new(),
        message_counter: None,
    }
}

#[tokio::test]
async fn lobby_lifecycle() {
    let db = Db::in_memory().await.unwrap();
    let blobs = Blobs::new(db.pool().clone());
    let ana = signed_up(&db, &blobs, "ana").await;
    let bob = signed_up(&db, &blobs, "bob").await;

    // ana opens a public room and is its first member
    let room_id = generate_id("General Banter", ChatroomVisibility::Public);
    create_chatroom(&db, &public_room(room_id.clone(), &ana, "General Banter"), &ana.uid)
        .await
        .unwrap();

    // bob finds it by title and enters; entering twice changes nothing
    let SearchOutcome::Rooms(hits) = search_rooms(&db, &bob.uid, "banter").await.unwrap() else {
        panic!("expected rooms");
    };
    assert_eq!(hits.len(), 1);
    enter_chatroom(&db, &bob.uid, &hits[0].id).await.unwrap();
    enter_chatroom(&db, &bob.uid, &hits[0].id).await.unwrap();

    let room: ChatroomData =
        serde_json::from_value(db.get(&format!("chatrooms/{room_id}")).await.unwrap()).unwrap();
    assert_eq!(room.user_data, [ana.uid.clone(), bob.uid.clone()]);

    // conversation, in order
    send_msg(&db, &ana, &room_id, "hi".to_owned()).await.unwrap();
    send_msg(&db, &ana, &room_id, "anyone here?".to_owned()).await.unwrap();
    let bob_key = send_msg(&db, &bob, &room_id, "yes!".to_owned()).await.unwrap();
    assert_eq!(bob_key, 2);

    let list = message_list(&db.get(&format!("chatrooms/{room_id}/messages")).await.unwrap());
    let bodies: Vec<&str> = list.iter().map(|m| m.message.data.as_str()).collect();
    assert_eq!(bodies, ["hi", "anyone here?", "yes!"]);

    // bob thinks better of it
    assert!(unsend_msg(&db, &bob.uid, &room_id, bob_key).await.unwrap());
    let list = message_list(&db.get(&format!("chatrooms/{room_id}/messages")).await.unwrap());
    assert_eq!(list.len(), 2);
    // the claimed index stays burnt, the next message does not reuse it
    assert_eq!(
        send_msg(&db, &bob, &room_id, "sorry".to_owned()).await.unwrap(),
        3
    );

    // ana deletes the room; bob's joined list is swept clean
    delete_chatroom(&db, &blobs, &room_id).await.unwrap();
    let SearchOutcome::Rooms(joined) = search_rooms(&db, &bob.uid, "").await.unwrap() else {
        panic!("expected rooms");
    };
    assert!(joined.is_empty());
    assert!(db.get(&format!("chatrooms/{room_id}")).await.unwrap().is_null());
}

#[tokio::test]
async fn people_search_leads_to_a_private_room() {
    let db = Db::in_memory().await.unwrap();
    let blobs = Blobs::new(db.pool().clone());
    let ana = signed_up(&db, &blobs, "ana").await;
    let bob = signed_up(&db, &blobs, "bob").await;

    let SearchOutcome::Users(hits) = search_rooms(&db, &ana.uid, "@bo").await.unwrap() else {
        panic!("expected users");
    };
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, bob.uid);

    // the private room both land in, as the lobby builds it
    let room = ChatroomData {
        id: generate_id("", ChatroomVisibility::Private),
        visibility: ChatroomVisibility::Private,
        owner: ana.uid.clone(),
        title: format!("Chatroom with {} and {}", bob.username, ana.username),
        description: String::new(),
        image: None,
        user_data: Vec::new(),
        message_counter: None,
    };
    create_chatroom(&db, &room, &ana.uid).await.unwrap();
    add_user_to_chatroom(&db, &bob.uid, &room.id).await.unwrap();

    // invisible to title search, reachable by id
    let SearchOutcome::Rooms(by_title) = search_rooms(&db, &ana.uid, "Chatroom with").await.unwrap()
    else {
        panic!("expected rooms");
    };
    assert!(by_title.is_empty());
    let SearchOutcome::Rooms(by_id) =
        search_rooms(&db, &ana.uid, &format!("#{}", room.id)).await.unwrap()
    else {
        panic!("expected rooms");
    };
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].user_data, [ana.uid.clone(), bob.uid.clone()]);
}

#[tokio::test]
async fn notifications_reach_the_other_member() {
    let db = Db::in_memory().await.unwrap();
    let blobs = Blobs::new(db.pool().clone());
    let ana = signed_up(&db, &blobs, "ana").await;
    let bob = signed_up(&db, &blobs, "bob").await;

    let room_id = generate_id("Pings", ChatroomVisibility::Public);
    create_chatroom(&db, &public_room(room_id.clone(), &ana, "Pings"), &ana.uid)
        .await
        .unwrap();
    enter_chatroom(&db, &bob.uid, &room_id).await.unwrap();

    let mut dispatcher = Dispatcher::watch(&db, &bob.uid).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_msg(&db, &ana, &room_id, "ping".to_owned()).await.unwrap();
    let notification = tokio::time::timeout(Duration::from_secs(2), dispatcher.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.room, "Pings");
    assert_eq!(notification.from, "ana");
    assert_eq!(notification.summary, "ping");
}
