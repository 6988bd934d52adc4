//! End-to-end protocol scenarios over loopback TCP.
//!
//! These tests drive raw protocol frames against a running server, one
//! socket per simulated client.

use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpStream;
use veil_crypto::{auth_hash, derive_key, AuthHash};
use veil_proto::{
    parse_chat, parse_identity_list, Message, MessageKind, RejectReason, SessionId,
};
use veil_server::{Server, ServerConfig};

async fn start_server() -> SocketAddr {
    let server = Server::bind(ServerConfig { bind_address: "127.0.0.1:0".to_string() })
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

fn hash(passphrase: &str) -> AuthHash {
    auth_hash(&derive_key(passphrase))
}

async fn recv(stream: &mut TcpStream) -> Message {
    tokio::time::timeout(Duration::from_secs(5), Message::read_from(stream))
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .expect("peer closed the connection")
}

/// Expect the server to close the connection without further frames.
async fn expect_closed(stream: &mut TcpStream) {
    let read = tokio::time::timeout(Duration::from_secs(5), Message::read_from(stream))
        .await
        .expect("timed out waiting for close");
    assert!(read.unwrap().is_none(), "expected a closed connection");
}

/// Expect silence on the stream for a little while.
async fn expect_nothing(stream: &mut TcpStream) {
    let read = tokio::time::timeout(Duration::from_millis(100), Message::read_from(stream)).await;
    assert!(read.is_err(), "expected no frame, got {read:?}");
}

/// Create a session and complete the identity exchange.
async fn create_session(addr: SocketAddr, key_hash: &AuthHash, ident: &str) -> (TcpStream, SessionId) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::create(key_hash.as_bytes()).unwrap().write_to(&mut stream).await.unwrap();

    let created = recv(&mut stream).await;
    assert_eq!(created.kind(), MessageKind::Created);
    let session_id = veil_proto::parse_created(created.payload()).unwrap();

    complete_identity_exchange(&mut stream, ident).await;
    (stream, session_id)
}

/// Join an existing session and complete the identity exchange.
async fn join_session(
    addr: SocketAddr,
    session_id: SessionId,
    key_hash: &AuthHash,
    ident: &str,
) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::join(session_id, key_hash.as_bytes()).unwrap().write_to(&mut stream).await.unwrap();

    let accepted = recv(&mut stream).await;
    assert_eq!(accepted.kind(), MessageKind::Accept);

    complete_identity_exchange(&mut stream, ident).await;
    stream
}

async fn complete_identity_exchange(stream: &mut TcpStream, ident: &str) {
    let request = recv(stream).await;
    assert_eq!(request.kind(), MessageKind::IdentRequest);
    Message::identities(&[ident]).unwrap().write_to(stream).await.unwrap();
}

/// Request the roster and wait until it reaches the expected size; the
/// membership registration of a just-identified peer is asynchronous.
async fn await_roster(stream: &mut TcpStream, expected: &mut Vec<String>) {
    expected.sort();
    for _ in 0..50 {
        Message::ident_request().write_to(stream).await.unwrap();
        let reply = recv(stream).await;
        assert_eq!(reply.kind(), MessageKind::Ident);
        let mut roster: Vec<String> = parse_identity_list(reply.payload())
            .unwrap()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        roster.sort();
        if roster == *expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("roster never reached {expected:?}");
}

#[tokio::test]
async fn chat_relays_to_peers_but_never_echoes() {
    let addr = start_server().await;
    let key_hash = hash("hunter2");

    let (mut alice, session_id) = create_session(addr, &key_hash, "alice").await;
    let mut bob = join_session(addr, session_id, &key_hash, "bob").await;

    // Alice, already a member, hears about bob's arrival from the server.
    let entered = recv(&mut alice).await;
    assert_eq!(entered.kind(), MessageKind::Chat);
    let (source, body) = parse_chat(entered.payload()).unwrap();
    assert_eq!(&source[..], b"server");
    assert_eq!(&body[..], b"bob has entered the session");

    // Wait until bob's registration is visible before alice speaks.
    await_roster(&mut bob, &mut vec!["alice".to_string(), "bob".to_string()]).await;

    Message::chat(b"hi").unwrap().write_to(&mut alice).await.unwrap();

    let relayed = recv(&mut bob).await;
    assert_eq!(relayed.kind(), MessageKind::Chat);
    let (source, body) = parse_chat(relayed.payload()).unwrap();
    assert_eq!(&source[..], b"alice");
    assert_eq!(&body[..], b"hi");

    // The sender never sees her own message echoed back.
    expect_nothing(&mut alice).await;
}

#[tokio::test]
async fn join_unknown_session_rejected_with_reason_zero() {
    let addr = start_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::join(999, hash("whatever").as_bytes()).unwrap().write_to(&mut stream).await.unwrap();

    let reply = recv(&mut stream).await;
    assert_eq!(reply.kind(), MessageKind::Reject);
    assert_eq!(RejectReason::from_u8(reply.payload()[0]), RejectReason::UnknownSession);

    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn join_with_wrong_hash_rejected_with_reason_one() {
    let addr = start_server().await;

    let (_alice, session_id) = create_session(addr, &hash("hunter2"), "alice").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::join(session_id, hash("letmein").as_bytes())
        .unwrap()
        .write_to(&mut stream)
        .await
        .unwrap();

    let reply = recv(&mut stream).await;
    assert_eq!(reply.kind(), MessageKind::Reject);
    assert_eq!(RejectReason::from_u8(reply.payload()[0]), RejectReason::HashMismatch);

    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn encrypted_chat_is_relayed_opaquely() {
    let addr = start_server().await;
    let key_hash = hash("hunter2");

    let (mut alice, session_id) = create_session(addr, &key_hash, "alice").await;
    let mut bob = join_session(addr, session_id, &key_hash, "bob").await;
    let _entered = recv(&mut alice).await;
    await_roster(&mut bob, &mut vec!["alice".to_string(), "bob".to_string()]).await;

    let blob = veil_crypto::encrypt(&derive_key("hunter2"), b"attack at dawn");
    Message::chat_encrypted(&blob).unwrap().write_to(&mut alice).await.unwrap();

    let relayed = recv(&mut bob).await;
    assert_eq!(relayed.kind(), MessageKind::ChatEncrypted);
    let (source, body) = parse_chat(relayed.payload()).unwrap();
    assert_eq!(&source[..], b"alice");
    // The relay forwarded the blob untouched; only the key opens it.
    assert_eq!(veil_crypto::decrypt(&derive_key("hunter2"), &body).unwrap(), b"attack at dawn");
}

#[tokio::test]
async fn chat_as_first_message_is_a_violation() {
    let addr = start_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::chat(b"too eager").unwrap().write_to(&mut stream).await.unwrap();

    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn identity_reply_with_two_entries_is_a_violation() {
    let addr = start_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::create(hash("k").as_bytes()).unwrap().write_to(&mut stream).await.unwrap();

    let created = recv(&mut stream).await;
    assert_eq!(created.kind(), MessageKind::Created);
    let request = recv(&mut stream).await;
    assert_eq!(request.kind(), MessageKind::IdentRequest);

    Message::identities(&["alice", "mallory"]).unwrap().write_to(&mut stream).await.unwrap();

    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn abort_closes_the_connection_and_announces_departure() {
    let addr = start_server().await;
    let key_hash = hash("hunter2");

    let (mut alice, session_id) = create_session(addr, &key_hash, "alice").await;
    let mut bob = join_session(addr, session_id, &key_hash, "bob").await;
    let _entered = recv(&mut alice).await;
    await_roster(&mut bob, &mut vec!["alice".to_string(), "bob".to_string()]).await;

    Message::abort().write_to(&mut bob).await.unwrap();
    expect_closed(&mut bob).await;

    let left = recv(&mut alice).await;
    assert_eq!(left.kind(), MessageKind::Chat);
    let (source, body) = parse_chat(left.payload()).unwrap();
    assert_eq!(&source[..], b"server");
    assert_eq!(&body[..], b"bob has left the session");
}

#[tokio::test]
async fn truncated_auth_hash_is_a_violation() {
    let addr = start_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    Message::create(&[1, 2, 3]).unwrap().write_to(&mut stream).await.unwrap();

    expect_closed(&mut stream).await;
}
