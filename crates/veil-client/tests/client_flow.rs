//! Client engine scenarios against a scripted server.
//!
//! Each test binds a loopback listener, runs the client against it, and
//! plays the server's half of the conversation by hand.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{mpsc, Mutex},
};
use veil_client::{Client, ClientError, Console, Credential};
use veil_crypto::{auth_hash, derive_key};
use veil_proto::{parse_chat, parse_join, Message, MessageKind, RejectReason};

/// Console driven by the test: input lines arrive over a channel, output
/// lines are collected for assertions.
struct ScriptedConsole {
    input: Mutex<mpsc::UnboundedReceiver<String>>,
    output: std::sync::Mutex<Vec<String>>,
}

impl ScriptedConsole {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let console = Arc::new(Self {
            input: Mutex::new(rx),
            output: std::sync::Mutex::new(Vec::new()),
        });
        (console, tx)
    }

    fn lines(&self) -> Vec<String> {
        self.output.lock().unwrap().clone()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    fn display_line(&self, text: &str) {
        self.output.lock().unwrap().push(text.to_string());
    }

    fn display_emphasis_line(&self, text: &str) {
        self.output.lock().unwrap().push(text.to_string());
    }

    async fn read_line(&self, _prompt: &str, _masked: bool) -> std::io::Result<Option<String>> {
        Ok(self.input.lock().await.recv().await)
    }
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn recv(stream: &mut TcpStream) -> Message {
    tokio::time::timeout(Duration::from_secs(5), Message::read_from(stream))
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .expect("client closed the connection")
}

/// Poll the console until `needle` shows up in its output.
async fn wait_for_line(console: &ScriptedConsole, needle: &str) {
    for _ in 0..250 {
        if console.lines().iter().any(|line| line == needle) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("console never displayed {needle:?}; lines: {:?}", console.lines());
}

#[tokio::test]
async fn join_converse_and_display() {
    let (listener, addr) = listen().await;
    let (console, input) = ScriptedConsole::new();

    let key = derive_key("hunter2");
    let expected_hash = *auth_hash(&key).as_bytes();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        // Handshake: the client asks to join session 0x00FF.
        let join = recv(&mut stream).await;
        assert_eq!(join.kind(), MessageKind::Join);
        let (session_id, hash) = parse_join(join.payload()).unwrap();
        assert_eq!(session_id, 0x00FF);
        assert_eq!(hash, &expected_hash[..]);
        Message::accept().write_to(&mut stream).await.unwrap();

        // Identity exchange, server-initiated.
        Message::ident_request().write_to(&mut stream).await.unwrap();
        let ident = recv(&mut stream).await;
        assert_eq!(ident.kind(), MessageKind::Ident);
        let announced = veil_proto::parse_identity_list(ident.payload()).unwrap();
        assert_eq!(announced.len(), 1);
        assert_eq!(&announced[0][..], b"bob");

        // The client requests the roster right after announcing itself.
        let roster_request = recv(&mut stream).await;
        assert_eq!(roster_request.kind(), MessageKind::IdentRequest);
        Message::identities(&["alice", "bob"]).unwrap().write_to(&mut stream).await.unwrap();

        // Relay a plaintext chat from alice.
        let chat = Message::chat(b"hi bob").unwrap().prepend_source(b"alice").unwrap();
        chat.write_to(&mut stream).await.unwrap();

        // And an encrypted one.
        let sealed = veil_crypto::encrypt(&derive_key("hunter2"), b"secret hello");
        let encrypted =
            Message::chat_encrypted(&sealed).unwrap().prepend_source(b"alice").unwrap();
        encrypted.write_to(&mut stream).await.unwrap();

        // The client's outbound loop ships our line as an encrypted chat.
        let outbound = recv(&mut stream).await;
        assert_eq!(outbound.kind(), MessageKind::ChatEncrypted);
        let opened = veil_crypto::decrypt(&derive_key("hunter2"), outbound.payload()).unwrap();
        assert_eq!(opened, b"hello from bob");

        // Server closes; the client sees an ordinary disconnect.
    });

    let client = Client::new(Credential::join(0x00FF, "hunter2", "bob"));
    let probe = Arc::clone(&console);
    let run = tokio::spawn(async move { client.run(&addr.to_string(), console).await });

    // Hold the outbound line back until the identity exchange is done, so
    // the scripted server sees frames in a deterministic order.
    wait_for_line(&probe, "====================").await;
    input.send("hello from bob".to_string()).unwrap();

    // Keep input open until the relayed chats have been rendered, then
    // end input to let the run finish.
    wait_for_line(&probe, "alice: secret hello").await;
    drop(input);

    server.await.unwrap();
    run.await.unwrap().unwrap();

    let lines = probe.lines();
    assert!(lines.contains(&"joined session 00ff".to_string()), "lines: {lines:?}");
    assert!(lines.contains(&"alice: hi bob".to_string()), "lines: {lines:?}");
    assert!(lines.contains(&"alice: secret hello".to_string()), "lines: {lines:?}");
    assert!(lines.contains(&"    bob".to_string()), "roster missing: {lines:?}");
}

#[tokio::test]
async fn create_receives_session_id() {
    let (listener, addr) = listen().await;
    let (console, input) = ScriptedConsole::new();
    drop(input);

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let create = recv(&mut stream).await;
        assert_eq!(create.kind(), MessageKind::Create);
        assert_eq!(create.payload().len(), 32);
        Message::created(0xBEEF).write_to(&mut stream).await.unwrap();
    });

    let client = Client::new(Credential::create("hunter2", "alice"));
    let probe = Arc::clone(&console);
    let run = tokio::spawn(async move { client.run(&addr.to_string(), console).await });

    server.await.unwrap();
    run.await.unwrap().unwrap();
    assert!(probe.lines().contains(&"created session beef".to_string()));
}

#[tokio::test]
async fn rejection_surfaces_the_reason() {
    let (listener, addr) = listen().await;
    let (console, _input) = ScriptedConsole::new();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _join = recv(&mut stream).await;
        Message::reject(RejectReason::HashMismatch).write_to(&mut stream).await.unwrap();
    });

    let client = Client::new(Credential::join(1, "wrong", "eve"));
    let err = client.run(&addr.to_string(), console).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(RejectReason::HashMismatch)));
}

#[tokio::test]
async fn tampered_ciphertext_tears_down_the_connection() {
    let (listener, addr) = listen().await;
    let (console, _input) = ScriptedConsole::new();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _join = recv(&mut stream).await;
        Message::accept().write_to(&mut stream).await.unwrap();

        let mut sealed = veil_crypto::encrypt(&derive_key("hunter2"), b"payload");
        sealed[20] ^= 0x01;
        let tampered =
            Message::chat_encrypted(&sealed).unwrap().prepend_source(b"mallory").unwrap();
        tampered.write_to(&mut stream).await.unwrap();

        // The client aborts: expect its abort frame or a closed socket.
        let _ = Message::read_from(&mut stream).await;
    });

    let client = Client::new(Credential::join(1, "hunter2", "bob"));
    let err = client.run(&addr.to_string(), console).await.unwrap_err();
    assert!(matches!(err, ClientError::Crypto(_)), "got: {err:?}");
}

#[tokio::test]
async fn server_abort_is_fatal() {
    let (listener, addr) = listen().await;
    let (console, _input) = ScriptedConsole::new();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _join = recv(&mut stream).await;
        Message::accept().write_to(&mut stream).await.unwrap();
        Message::abort().write_to(&mut stream).await.unwrap();
        let _ = Message::read_from(&mut stream).await;
    });

    let client = Client::new(Credential::join(1, "hunter2", "bob"));
    let err = client.run(&addr.to_string(), console).await.unwrap_err();
    assert!(matches!(err, ClientError::PeerAbort));
}

#[tokio::test]
async fn parse_chat_reconstructs_relayed_frames() {
    // Sanity-check the test helpers agree with the codec.
    let framed = Message::chat(b"x").unwrap().prepend_source(b"server").unwrap();
    let (source, body) = parse_chat(framed.payload()).unwrap();
    assert_eq!(&source[..], b"server");
    assert_eq!(&body[..], b"x");
}
