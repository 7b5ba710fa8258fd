//! Subscriptions against an in-process STOMP-over-WebSocket broker.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::BytesMut;
use common::{node, FakeControl, CONSUMER};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use px_grid::capabilities::session_directory::{SessionTopicMessage, SERVICE_NAME};
use px_grid::capabilities::SessionDirectory;
use px_grid::config::{DnsConfig, PubSubConfig, TlsConfig};
use px_grid::pubsub::{Dialer, PubSubRegistry};
use px_grid::resolve::Resolver;
use px_grid::tls::TlsContext;
use px_grid::{Message, ServiceDispatcher, ServiceNode, Subscription};
use px_stomp::{header, Command, Frame, StompCodec};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

const SESSION_BODY: &str = r#"{"sequence":1,"sessions":[]}"#;
const TOPIC: &str = "/topic/com.cisco.ise.session";

// ── broker ──────────────────────────────────────────────────────────

struct Broker {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    authorizations: Arc<Mutex<Vec<String>>>,
}

impl Broker {
    /// `stall_first`: the first connection stops reading (and so stops
    /// answering pings) after its first SUBSCRIBE.
    async fn start(stall_first: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let authorizations = Arc::new(Mutex::new(Vec::new()));

        let (count, auths) = (connections.clone(), authorizations.clone());
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                let auths = auths.clone();
                tokio::spawn(async move {
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        if let Some(v) = req.headers().get("authorization") {
                            auths.lock().push(v.to_str().unwrap_or_default().to_owned());
                        }
                        Ok(resp)
                    };
                    let ws = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
                    serve(ws, stall_first && n == 1).await;
                });
            }
        });

        Self {
            addr,
            connections,
            authorizations,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/pxgrid/ise/pubsub", self.addr)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, frame: Frame) {
    let mut out = BytesMut::new();
    StompCodec::default().encode(frame, &mut out).unwrap();
    ws.send(WsMessage::Binary(out.to_vec())).await.unwrap();
}

async fn serve(mut ws: WebSocketStream<TcpStream>, stall_after_subscribe: bool) {
    let mut codec = StompCodec::default();
    let mut buf = BytesMut::new();
    let mut delivered = 0;

    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            WsMessage::Binary(b) => buf.extend_from_slice(&b),
            WsMessage::Text(t) => buf.extend_from_slice(t.as_bytes()),
            WsMessage::Close(_) => break,
            _ => continue,
        }
        while let Ok(Some(frame)) = codec.decode(&mut buf) {
            match frame.command {
                Command::Connect => {
                    let connected = Frame::new(Command::Connected)
                        .with_header(header::VERSION, "1.2")
                        .with_header(header::SESSION, "s-1");
                    send(&mut ws, connected).await;
                }
                Command::Subscribe => {
                    delivered += 1;
                    let msg = Frame::new(Command::Message)
                        .with_header(header::SUBSCRIPTION, frame.header(header::ID).unwrap_or_default())
                        .with_header(header::DESTINATION, frame.header(header::DESTINATION).unwrap_or_default())
                        .with_header(header::MESSAGE_ID, format!("m-{delivered}"))
                        .with_body(SESSION_BODY);
                    send(&mut ws, msg).await;
                    if stall_after_subscribe {
                        std::future::pending::<()>().await;
                    }
                }
                Command::Disconnect => {
                    if let Some(receipt) = frame.header(header::RECEIPT) {
                        let receipt = Frame::new(Command::Receipt).with_header(header::RECEIPT_ID, receipt);
                        send(&mut ws, receipt).await;
                    }
                    let _ = ws.close(None).await;
                    return;
                }
                _ => {}
            }
        }
    }
}

// ── client side ─────────────────────────────────────────────────────

fn settings() -> PubSubConfig {
    PubSubConfig {
        probe_timeout_ms: 200,
        handshake_timeout_ms: 2_000,
        ..Default::default()
    }
}

fn psn(name: &str, broker: &Broker) -> ServiceNode {
    node(
        name,
        json!({
            "wsUrl": broker.ws_url(),
            "wsPubsubService": "com.cisco.ise.pubsub",
            "sessionTopic": TOPIC,
        }),
    )
}

fn setup(broker: &Broker) -> (Arc<FakeControl>, Arc<PubSubRegistry>, SessionDirectory) {
    setup_with(broker, FakeControl::new(vec![psn("psn-1", broker)]))
}

fn setup_with(
    broker: &Broker,
    control: FakeControl,
) -> (Arc<FakeControl>, Arc<PubSubRegistry>, SessionDirectory) {
    let control = Arc::new(control);
    let dialer = Arc::new(Dialer::new(
        Arc::new(Resolver::new(&DnsConfig::default()).unwrap()),
        Arc::new(TlsContext::from_config(&TlsConfig::default()).unwrap()),
        Duration::from_secs(2),
    ));
    let registry = Arc::new(PubSubRegistry::new(control.clone(), dialer, settings()));
    let sessions = SessionDirectory::new(
        Arc::new(ServiceDispatcher::new(SERVICE_NAME, control.clone())),
        registry.clone(),
    );
    (control, registry, sessions)
}

async fn next_body(sub: &mut Subscription<SessionTopicMessage>) -> SessionTopicMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription ended");
    match msg {
        Message::Body { body, .. } => body,
        other => panic!("expected a body, got {other:?}"),
    }
}

#[tokio::test]
async fn topic_messages_are_decoded() {
    let broker = Broker::start(false).await;
    let (_, _, sessions) = setup(&broker);

    let mut sub = sessions
        .on_session_topic()
        .subscribe(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sub.topic(), TOPIC);

    let body = next_body(&mut sub).await;
    assert_eq!(body.sequence, 1);
    assert!(body.sessions.is_empty());
}

#[tokio::test]
async fn websocket_authenticates_with_node_secret() {
    let broker = Broker::start(false).await;
    let (control, _, sessions) = setup(&broker);

    let mut sub = sessions
        .on_session_topic()
        .subscribe(&CancellationToken::new())
        .await
        .unwrap();
    next_body(&mut sub).await;

    let expected = format!("Basic {}", STANDARD.encode(format!("{CONSUMER}:secret-psn-1")));
    assert_eq!(*broker.authorizations.lock(), vec![expected]);
    assert_eq!(control.secrets(), 1);
}

#[tokio::test]
async fn live_connection_is_shared() {
    let broker = Broker::start(false).await;
    let (_, registry, sessions) = setup(&broker);
    let cancel = CancellationToken::new();

    let mut a = sessions.on_session_topic().subscribe(&cancel).await.unwrap();
    let mut b = sessions.on_session_topic().subscribe(&cancel).await.unwrap();
    next_body(&mut a).await;
    next_body(&mut b).await;

    assert_ne!(a.id(), b.id());
    assert_eq!(broker.connections(), 1);
    assert_eq!(registry.get("com.cisco.ise.pubsub").endpoint_count(), 1);
}

#[tokio::test]
async fn half_open_connection_is_redialed() {
    let broker = Broker::start(true).await;
    let (_, _, sessions) = setup(&broker);
    let cancel = CancellationToken::new();

    let mut first = sessions.on_session_topic().subscribe(&cancel).await.unwrap();
    next_body(&mut first).await;

    // The broker no longer reads the first socket, so the liveness probe
    // goes unanswered.
    let mut second = sessions.on_session_topic().subscribe(&cancel).await.unwrap();
    next_body(&mut second).await;
    assert_eq!(broker.connections(), 2);
}

#[tokio::test]
async fn disconnect_ends_subscriptions() {
    let broker = Broker::start(false).await;
    let (_, registry, sessions) = setup(&broker);

    let mut sub = sessions
        .on_session_topic()
        .subscribe(&CancellationToken::new())
        .await
        .unwrap();
    next_body(&mut sub).await;

    registry.disconnect_all().await;
    let end = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("subscription did not end");
    assert!(end.is_none());
}

#[tokio::test]
async fn relookup_during_secret_exchange_keeps_picked_node() {
    let broker = Broker::start(false).await;
    let (control, registry, sessions) = setup_with(
        &broker,
        FakeControl::new(vec![psn("psn-1", &broker)]).with_secret_gate(),
    );

    let task = tokio::spawn(async move {
        sessions
            .on_session_topic()
            .subscribe(&CancellationToken::new())
            .await
    });
    control.gate().entered.notified().await;

    control.set_nodes(vec![psn("psn-2", &broker), psn("psn-1", &broker)]);
    let pubsub = registry.get("com.cisco.ise.pubsub");
    pubsub.dispatcher().lookup(&CancellationToken::new()).await.unwrap();
    control.gate().release.notify_one();

    let mut sub = task.await.unwrap().unwrap();
    next_body(&mut sub).await;

    let expected = format!("Basic {}", STANDARD.encode(format!("{CONSUMER}:secret-psn-1")));
    assert_eq!(*broker.authorizations.lock(), vec![expected]);
    assert!(pubsub.dispatcher().nodes().iter().all(|n| !n.has_secret()));
}
