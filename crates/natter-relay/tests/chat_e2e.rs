//! End-to-end relay tests over TCP.
//!
//! Run with: `cargo test -p natter-relay --test chat_e2e`

mod common;

use common::{init_test, RawClient, TestClient, TestServer};
use natter_relay::{ClientMessage, ErrorCode, Identity, RelayConfig, ServerMessage};

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_registers_identity() {
    init_test();
    let server = TestServer::start().await;

    let _alice = TestClient::login(&server, "alice").await;

    assert!(server.registry.is_connected("alice"));
}

#[tokio::test]
async fn test_message_before_login_is_protocol_mismatch() {
    init_test();
    let server = TestServer::start().await;
    let mut client = TestClient::connect(&server).await;

    client.chat("bob", "hi").await;

    match client.recv().await {
        ServerMessage::Err { code, .. } => assert_eq!(code, ErrorCode::ProtocolMismatch),
        other => panic!("expected protocol mismatch, got {:?}", other),
    }
    client.expect_closed().await;
    assert_eq!(server.registry.connection_count(), 0);
}

#[tokio::test]
async fn test_history_before_login_is_protocol_mismatch() {
    init_test();
    let server = TestServer::start().await;
    let mut client = TestClient::connect(&server).await;

    client.send(ClientMessage::History { since_seq: 1 }).await;

    assert!(matches!(
        client.recv().await,
        ServerMessage::Err {
            code: ErrorCode::ProtocolMismatch,
            ..
        }
    ));
    client.expect_closed().await;
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_alice_messages_bob() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;
    let mut bob = TestClient::login(&server, "bob").await;

    alice.chat("bob", "hi").await;

    assert_eq!(
        bob.recv().await,
        ServerMessage::Chat {
            from: Identity::from("alice"),
            content: "hi".to_string(),
        }
    );

    let bob_log = server.store.query(&Identity::from("bob"), 1).await.unwrap();
    assert_eq!(bob_log.len(), 1);
    assert_eq!(bob_log[0].seq, 1);
    assert_eq!(bob_log[0].from, Identity::from("alice"));
    let alice_log = server.store.query(&Identity::from("alice"), 1).await.unwrap();
    assert_eq!(alice_log.len(), 1);
}

#[tokio::test]
async fn test_offline_recipient_is_person_not_found() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;

    alice.chat("carol", "x").await;

    match alice.recv().await {
        ServerMessage::Err { code, message } => {
            assert_eq!(code, ErrorCode::PersonNotFound);
            assert!(message.contains("carol"));
        }
        other => panic!("expected person not found, got {:?}", other),
    }

    // The session stays usable.
    let mut bob = TestClient::login(&server, "bob").await;
    alice.chat("bob", "after").await;
    assert!(matches!(
        bob.recv().await,
        ServerMessage::Chat { content, .. } if content == "after"
    ));

    // Both messages sit in alice's log.
    let alice_log = server.store.query(&Identity::from("alice"), 1).await.unwrap();
    assert_eq!(alice_log.len(), 2);
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;
    let mut bob = TestClient::login(&server, "bob").await;

    for i in 0..50 {
        alice.chat("bob", &format!("m{}", i)).await;
    }

    for i in 0..50 {
        match bob.recv().await {
            ServerMessage::Chat { content, .. } => assert_eq!(content, format!("m{}", i)),
            other => panic!("expected chat, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_small_queue_still_delivers_everything() {
    init_test();
    let server = TestServer::start_with_config(RelayConfig::default().with_outbound_capacity(1)).await;
    let mut alice = TestClient::login(&server, "alice").await;
    let mut carol = TestClient::login(&server, "carol").await;
    let mut bob = TestClient::login(&server, "bob").await;

    for i in 0..20 {
        alice.chat("bob", &format!("a{}", i)).await;
        carol.chat("bob", &format!("c{}", i)).await;
    }

    let mut from_alice = Vec::new();
    let mut from_carol = Vec::new();
    for _ in 0..40 {
        match bob.recv().await {
            ServerMessage::Chat { from, content } if from.as_str() == "alice" => from_alice.push(content),
            ServerMessage::Chat { content, .. } => from_carol.push(content),
            other => panic!("expected chat, got {:?}", other),
        }
    }

    let expected_alice: Vec<String> = (0..20).map(|i| format!("a{}", i)).collect();
    let expected_carol: Vec<String> = (0..20).map(|i| format!("c{}", i)).collect();
    assert_eq!(from_alice, expected_alice);
    assert_eq!(from_carol, expected_carol);
}

#[tokio::test]
async fn test_self_message_is_delivered_and_logged_twice() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;

    alice.chat("alice", "note to self").await;

    assert!(matches!(
        alice.recv().await,
        ServerMessage::Chat { from, .. } if from.as_str() == "alice"
    ));
    // Sender copy and recipient copy, numbered independently.
    let log = server.store.query(&Identity::from("alice"), 1).await.unwrap();
    let seqs: Vec<u64> = log.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
}

// =============================================================================
// Re-registration and Teardown
// =============================================================================

#[tokio::test]
async fn test_second_login_takes_over_routing() {
    init_test();
    let server = TestServer::start().await;
    let mut old_bob = TestClient::login(&server, "bob").await;
    let mut new_bob = TestClient::login(&server, "bob").await;
    let mut alice = TestClient::login(&server, "alice").await;

    alice.chat("bob", "which one?").await;

    assert!(matches!(
        new_bob.recv().await,
        ServerMessage::Chat { content, .. } if content == "which one?"
    ));

    // The old session is orphaned but stays open; its teardown must not
    // remove the newer registration.
    old_bob.send(ClientMessage::History { since_seq: 1 }).await;
    assert!(matches!(old_bob.recv().await, ServerMessage::History { .. }));
    drop(old_bob);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(server.registry.is_connected("bob"));
    alice.chat("bob", "still there").await;
    assert!(matches!(
        new_bob.recv().await,
        ServerMessage::Chat { content, .. } if content == "still there"
    ));
}

#[tokio::test]
async fn test_disconnect_unregisters() {
    init_test();
    let server = TestServer::start().await;
    let alice = TestClient::login(&server, "alice").await;
    server.wait_for_connected("alice", true).await;

    drop(alice);

    server.wait_for_connected("alice", false).await;
    let mut bob = TestClient::login(&server, "bob").await;
    bob.chat("alice", "gone?").await;
    assert!(matches!(
        bob.recv().await,
        ServerMessage::Err {
            code: ErrorCode::PersonNotFound,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reauth_terminates_session() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;

    alice.send_auth("alice").await;

    assert!(matches!(
        alice.recv().await,
        ServerMessage::Err {
            code: ErrorCode::ProtocolMismatch,
            ..
        }
    ));
    alice.expect_closed().await;
    server.wait_for_connected("alice", false).await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;

    server.stop().await;

    alice.expect_closed().await;
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn test_history_survives_reconnect() {
    init_test();
    let server = TestServer::start().await;
    let mut alice = TestClient::login(&server, "alice").await;

    // bob is offline; the messages are still recorded for him.
    for text in ["one", "two", "three"] {
        alice.chat("bob", text).await;
        alice.recv().await;
    }

    let mut bob = TestClient::login(&server, "bob").await;
    bob.send(ClientMessage::History { since_seq: 2 }).await;

    match bob.recv().await {
        ServerMessage::History { messages } => {
            let seqs: Vec<u64> = messages.iter().map(|m| m.seq).collect();
            assert_eq!(seqs, vec![2, 3]);
            assert_eq!(messages[0].content, "two");
        }
        other => panic!("expected history, got {:?}", other),
    }
}

// =============================================================================
// Wire Format
// =============================================================================

#[tokio::test]
async fn test_wire_format_is_json_lines() {
    init_test();
    let server = TestServer::start().await;
    let mut raw = RawClient::connect(server.addr).await.unwrap();

    raw.send_line(r#"{"type":"auth","username":"alice"}"#).await.unwrap();
    assert_eq!(
        raw.read_line().await.unwrap().as_deref(),
        Some(r#"{"type":"auth_ack"}"#)
    );

    raw.send_line(r#"{"type":"chat","to":"nobody","content":"x"}"#)
        .await
        .unwrap();
    let line = raw.read_line().await.unwrap().expect("expected an error line");
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "err");
    assert_eq!(value["code"], "person_not_found");
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    init_test();
    let server = TestServer::start().await;
    let mut raw = RawClient::connect(server.addr).await.unwrap();

    raw.send_line(r#"{"type":"auth","username":"alice"}"#).await.unwrap();
    raw.read_line().await.unwrap();

    raw.send_line("this is not json").await.unwrap();

    // Either a clean close or a reset; never another frame.
    assert!(!matches!(raw.read_line().await, Ok(Some(_))));
    server.wait_for_connected("alice", false).await;
}

#[tokio::test]
async fn test_unknown_type_before_login_is_protocol_mismatch() {
    init_test();
    let server = TestServer::start().await;
    let mut raw = RawClient::connect(server.addr).await.unwrap();

    raw.send_line(r#"{"type":"presence"}"#).await.unwrap();

    let line = raw.read_line().await.unwrap().expect("expected an error line");
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "err");
    assert_eq!(value["code"], "protocol_mismatch");
    assert!(!matches!(raw.read_line().await, Ok(Some(_))));
}

#[tokio::test]
async fn test_unknown_type_after_login_is_protocol_mismatch() {
    init_test();
    let server = TestServer::start().await;
    let mut raw = RawClient::connect(server.addr).await.unwrap();

    raw.send_line(r#"{"type":"auth","username":"alice"}"#).await.unwrap();
    raw.read_line().await.unwrap();

    raw.send_line(r#"{"type":"logout"}"#).await.unwrap();

    let line = raw.read_line().await.unwrap().expect("expected an error line");
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "err");
    assert_eq!(value["code"], "protocol_mismatch");
    assert!(!matches!(raw.read_line().await, Ok(Some(_))));
    server.wait_for_connected("alice", false).await;
}
