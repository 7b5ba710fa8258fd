//! Subscribe-only STOMP client over any async byte stream.
//!
//! After the CONNECT/CONNECTED exchange the connection is split into a
//! writer task (drains an outbound queue) and a reader task (routes MESSAGE
//! frames to subscriptions by their `subscription` header).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::StompCodec;
use crate::error::StompError;
use crate::frame::{header, Command, Frame};

/// Item delivered on a subscription channel.
pub type Delivery = Result<Frame, StompError>;

type SubscriberMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Delivery>>>>;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Virtual host sent in the `host` header.
    pub host: String,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub handshake_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            login: None,
            passcode: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// A connected STOMP session.
///
/// Dropping the client stops both background tasks and closes every
/// subscription channel.
pub struct StompClient {
    outbound: mpsc::Sender<Frame>,
    subscriptions: SubscriberMap,
    version: String,
    session: Option<String>,
    shutdown: CancellationToken,
}

/// Messages for one SUBSCRIBE.
#[derive(Debug)]
pub struct StompSubscription {
    id: String,
    destination: String,
    messages: mpsc::UnboundedReceiver<Delivery>,
}

impl StompSubscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Next MESSAGE frame, a connection failure, or `None` once the
    /// subscription is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.messages.recv().await
    }

    pub fn into_receiver(self) -> mpsc::UnboundedReceiver<Delivery> {
        self.messages
    }
}

impl StompClient {
    /// Run the CONNECT handshake over `io` with heart-beating disabled.
    pub async fn connect<T>(io: T, opts: ConnectOptions) -> Result<Self, StompError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut framed = Framed::new(io, StompCodec::default());

        let mut connect = Frame::new(Command::Connect)
            .with_header(header::ACCEPT_VERSION, "1.2")
            .with_header(header::HOST, opts.host.as_str())
            .with_header(header::HEART_BEAT, "0,0");
        if let Some(login) = &opts.login {
            connect = connect.with_header(header::LOGIN, login.as_str());
        }
        if let Some(passcode) = &opts.passcode {
            connect = connect.with_header(header::PASSCODE, passcode.as_str());
        }
        framed.send(connect).await?;

        let reply = tokio::time::timeout(opts.handshake_timeout, framed.next())
            .await
            .map_err(|_| StompError::HandshakeTimeout)?;
        let frame = match reply {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(e),
            None => return Err(StompError::Closed),
        };
        match frame.command {
            Command::Connected => {}
            Command::Error => return Err(StompError::Server(frame.error_message())),
            other => {
                return Err(StompError::Protocol(format!(
                    "expected CONNECTED, got {other}"
                )))
            }
        }

        let version = frame.header(header::VERSION).unwrap_or("1.0").to_owned();
        let session = frame.header(header::SESSION).map(str::to_owned);
        tracing::debug!(
            version = %version,
            session = session.as_deref().unwrap_or(""),
            server = frame.header(header::SERVER).unwrap_or(""),
            "stomp session established"
        );

        let (sink, stream) = framed.split();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(64);
        let subscriptions: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(sink, outbound_rx, shutdown.clone()));
        tokio::spawn(read_loop(stream, subscriptions.clone(), shutdown.clone()));

        Ok(Self {
            outbound: outbound_tx,
            subscriptions,
            version,
            session,
            shutdown,
        })
    }

    /// Protocol version agreed in CONNECTED.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }

    /// SUBSCRIBE to `destination` with `ack:auto`.
    pub async fn subscribe(&self, destination: &str) -> Result<StompSubscription, StompError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().insert(id.clone(), tx);

        // The reader cancels before draining, so a subscription registered
        // after the drain is caught here.
        if self.shutdown.is_cancelled() {
            self.subscriptions.lock().remove(&id);
            return Err(StompError::Closed);
        }

        let frame = Frame::new(Command::Subscribe)
            .with_header(header::ID, id.as_str())
            .with_header(header::DESTINATION, destination)
            .with_header(header::ACK, "auto");
        if let Err(e) = self.send(frame).await {
            self.subscriptions.lock().remove(&id);
            return Err(e);
        }

        tracing::debug!(id = %id, destination = %destination, "subscribed");
        Ok(StompSubscription {
            id,
            destination: destination.to_owned(),
            messages: rx,
        })
    }

    /// UNSUBSCRIBE and close the subscription's channel.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), StompError> {
        if self.subscriptions.lock().remove(id).is_none() {
            return Ok(());
        }
        let frame = Frame::new(Command::Unsubscribe).with_header(header::ID, id);
        self.send(frame).await
    }

    /// Send DISCONNECT and stop the session.
    pub async fn disconnect(&self) -> Result<(), StompError> {
        let frame = Frame::new(Command::Disconnect)
            .with_header(header::RECEIPT, uuid::Uuid::new_v4().to_string());
        let result = self.send(frame).await;
        self.subscriptions.lock().clear();
        result
    }

    async fn send(&self, frame: Frame) -> Result<(), StompError> {
        if self.shutdown.is_cancelled() {
            return Err(StompError::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| StompError::Closed)
    }
}

impl Drop for StompClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<Frame>, shutdown: CancellationToken)
where
    S: Sink<Frame, Error = StompError> + Unpin,
{
    loop {
        let frame = tokio::select! {
            f = outbound.recv() => f,
            _ = shutdown.cancelled() => break,
        };
        let Some(frame) = frame else { break };

        let closing = frame.command == Command::Disconnect;
        if let Err(e) = sink.send(frame).await {
            tracing::warn!(error = %e, "stomp write failed");
            break;
        }
        if closing {
            shutdown.cancel();
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S>(mut stream: S, subscriptions: SubscriberMap, shutdown: CancellationToken)
where
    S: Stream<Item = Result<Frame, StompError>> + Unpin,
{
    let failure = loop {
        let next = tokio::select! {
            n = stream.next() => n,
            _ = shutdown.cancelled() => break None,
        };
        match next {
            Some(Ok(frame)) => match frame.command {
                Command::Message => route(&subscriptions, frame),
                Command::Error => {
                    let message = frame.error_message();
                    tracing::warn!(error = %message, "stomp ERROR frame");
                    break Some(StompError::Server(message));
                }
                Command::Receipt => {
                    tracing::trace!(receipt = frame.header(header::RECEIPT_ID).unwrap_or(""), "receipt");
                }
                other => {
                    tracing::debug!(command = %other, "ignoring unexpected frame");
                }
            },
            Some(Err(e)) => break Some(e),
            None => break Some(StompError::Closed),
        }
    };

    shutdown.cancel();
    let drained: Vec<_> = subscriptions.lock().drain().collect();
    if let Some(err) = failure {
        tracing::debug!(error = %err, subscriptions = drained.len(), "stomp connection lost");
        for (_, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

fn route(subscriptions: &SubscriberMap, frame: Frame) {
    let Some(id) = frame.header(header::SUBSCRIPTION).map(str::to_owned) else {
        tracing::debug!("MESSAGE without subscription header");
        return;
    };
    let tx = subscriptions.lock().get(&id).cloned();
    match tx {
        Some(tx) => {
            if tx.send(Ok(frame)).is_err() {
                subscriptions.lock().remove(&id);
            }
        }
        None => tracing::trace!(id = %id, "MESSAGE for unknown subscription"),
    }
}
