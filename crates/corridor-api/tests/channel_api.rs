//! End-to-end handler tests against a standalone (single-node) core.

use std::sync::Arc;

use actix_web::{test, web, App};
use corridor_core::{CoreOptions, CorridorServer};
use corridor_store::MemoryBackend;
use serde_json::{json, Value};

async fn spawn_server() -> Arc<CorridorServer> {
    let dir = tempfile::tempdir().unwrap();
    let server = CorridorServer::new(
        CoreOptions::standalone(dir.path().to_path_buf()),
        Arc::new(MemoryBackend::new()),
    )
    .unwrap();
    server.start().await.unwrap();
    server
}

macro_rules! app {
    ($server:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($server.context().clone()))
                .configure(corridor_api::configure),
        )
        .await
    };
}

macro_rules! post_json {
    ($app:expr, $path:expr, $body:expr $(,)?) => {{
        let req = test::TestRequest::post()
            .uri($path)
            .set_json(&$body)
            .to_request();
        let resp = test::call_service($app, req).await;
        let status = resp.status().as_u16();
        let bytes = test::read_body(resp).await;
        let value: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }};
}

#[actix_web::test]
async fn single_node_send_and_read_back() {
    let server = spawn_server().await;
    let app = app!(server);

    let (status, _) = post_json!(
        &app,
        "/channel/subscriber_add",
        json!({"channel_id": "g1", "channel_type": 2, "subscribers": ["u1", "u2"]}),
    );
    assert_eq!(status, 200);

    let (status, body) = post_json!(
        &app,
        "/message/send",
        json!({
            "from_uid": "u1",
            "channel_id": "g1",
            "channel_type": 2,
            "payload": b"hello".to_vec(),
        }),
    );
    assert_eq!(status, 200);
    assert_eq!(body["message_seq"], 1);

    let (status, body) = post_json!(
        &app,
        "/channel/messagesync",
        json!({"login_uid": "u2", "channel_id": "g1", "channel_type": 2, "limit": 10}),
    );
    assert_eq!(status, 200);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message_seq"], 1);
    assert_eq!(messages[0]["from_uid"], "u1");

    server.stop().await;
}

#[actix_web::test]
async fn pull_up_and_pull_down_windows() {
    let server = spawn_server().await;
    let app = app!(server);

    for _ in 0..10 {
        let (status, _) = post_json!(
            &app,
            "/message/send",
            json!({
                "from_uid": "u1",
                "channel_id": "g1",
                "channel_type": 2,
                "payload": [1],
            }),
        );
        assert_eq!(status, 200);
    }

    // Up: [start, end) ascending.
    let (_, body) = post_json!(
        &app,
        "/channel/messagesync",
        json!({
            "login_uid": "u1",
            "channel_id": "g1",
            "channel_type": 2,
            "start_message_seq": 3,
            "end_message_seq": 7,
            "pull_mode": 1,
            "limit": 10
        }),
    );
    let seqs: Vec<u64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message_seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 4, 5, 6]);
    assert_eq!(body["more"], 0);

    // Down: (start, end] descending.
    let (_, body) = post_json!(
        &app,
        "/channel/messagesync",
        json!({
            "login_uid": "u1",
            "channel_id": "g1",
            "channel_type": 2,
            "start_message_seq": 3,
            "end_message_seq": 7,
            "pull_mode": 0,
            "limit": 10
        }),
    );
    let seqs: Vec<u64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message_seq"].as_u64().unwrap())
        .collect();
    assert_eq!(seqs, vec![7, 6, 5, 4]);
    assert_eq!(body["more"], 0);

    server.stop().await;
}

#[actix_web::test]
async fn allowlist_blocks_outsiders_and_seq_is_unchanged() {
    let server = spawn_server().await;
    let app = app!(server);

    let (status, _) = post_json!(
        &app,
        "/channel/whitelist_add",
        json!({"channel_id": "g1", "channel_type": 2, "uids": ["u1"]}),
    );
    assert_eq!(status, 200);

    let (status, _) = post_json!(
        &app,
        "/message/send",
        json!({
            "from_uid": "u2",
            "channel_id": "g1",
            "channel_type": 2,
            "payload": [1],
        }),
    );
    assert_eq!(status, 403);

    let req = test::TestRequest::get()
        .uri("/channel/max_message_seq?channel_id=g1&channel_type=2")
        .to_request();
    let resp = test::call_service(&app, req).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message_seq"], 0);

    server.stop().await;
}

#[actix_web::test]
async fn blacklist_set_is_last_writer_wins() {
    let server = spawn_server().await;
    let app = app!(server);
    let ctx = server.context().clone();
    let channel = corridor_commons::models::ChannelKey::new("g1", 2);

    let (status, _) = post_json!(
        &app,
        "/channel/blacklist_add",
        json!({"channel_id": "g1", "channel_type": 2, "uids": ["u1", "u2"]}),
    );
    assert_eq!(status, 200);

    let (status, _) = post_json!(
        &app,
        "/channel/blacklist_set",
        json!({"channel_id": "g1", "channel_type": 2, "uids": ["u9"]}),
    );
    assert_eq!(status, 200);
    assert_eq!(ctx.store.get_denylist(&channel).unwrap(), vec!["u9".to_string()]);

    server.stop().await;
}

#[actix_web::test]
async fn channel_delete_is_idempotent() {
    let server = spawn_server().await;
    let app = app!(server);

    let (status, _) = post_json!(
        &app,
        "/channel",
        json!({"channel_id": "g1", "channel_type": 2, "subscribers": ["u1"]}),
    );
    assert_eq!(status, 200);

    let delete = json!({"channel_id": "g1", "channel_type": 2});
    let (status, _) = post_json!(&app, "/channel/delete", delete.clone());
    assert_eq!(status, 200);
    let (status, _) = post_json!(&app, "/channel/delete", delete);
    assert_eq!(status, 200);

    server.stop().await;
}

#[actix_web::test]
async fn person_channels_reject_subscriber_management() {
    let server = spawn_server().await;
    let app = app!(server);

    let (status, _) = post_json!(
        &app,
        "/channel/subscriber_add",
        json!({"channel_id": "u2", "channel_type": 1, "subscribers": ["u1"]}),
    );
    assert_eq!(status, 400);

    server.stop().await;
}

#[actix_web::test]
async fn sync_limit_is_clamped() {
    let server = spawn_server().await;
    let app = app!(server);

    let (status, body) = post_json!(
        &app,
        "/channel/messagesync",
        json!({
            "login_uid": "u1",
            "channel_id": "empty",
            "channel_type": 2,
            "limit": 50_000
        }),
    );
    assert_eq!(status, 200);
    assert_eq!(body["more"], 0);
    assert!(body["messages"].as_array().unwrap().is_empty());

    server.stop().await;
}
