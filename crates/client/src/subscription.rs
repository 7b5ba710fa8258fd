//! Typed topic subscriptions.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use px_domain::node::PROP_WS_PUBSUB_SERVICE;
use px_domain::{Error, Result};
use px_stomp::Delivery;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::picker::NodePick;
use crate::pubsub::{PubSubRegistry, PubSubService, TopicSubscription};
use crate::service::ServiceDispatcher;

const CHANNEL_CAPACITY: usize = 64;

/// One delivery on a subscription. Exactly one of the three outcomes.
#[derive(Debug)]
pub enum Message<T> {
    Body {
        body: T,
        headers: Vec<(String, String)>,
    },
    /// The message arrived but its body is not a `T`.
    DecodeError { error: Error, raw: Bytes },
    /// The session failed; no more messages follow.
    TransportError(Error),
}

impl<T> Message<T> {
    pub fn body(&self) -> Option<&T> {
        match self {
            Message::Body { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            Message::Body { body, .. } => Ok(body),
            Message::DecodeError { error, .. } | Message::TransportError(error) => Err(error),
        }
    }
}

/// Messages of one topic, decoded into `T` on a background task.
///
/// Dropping it stops decoding but leaves the STOMP subscription in place
/// until the session ends; call [`unsubscribe`](Self::unsubscribe) to
/// release it on the node.
pub struct Subscription<T> {
    id: String,
    topic: String,
    stomp: Arc<px_stomp::StompClient>,
    rx: mpsc::Receiver<Message<T>>,
    translator: JoinHandle<()>,
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(raw: TopicSubscription) -> Self {
        let id = raw.id().to_owned();
        let topic = raw.destination().to_owned();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let translator = tokio::spawn(translate(raw.inner.into_receiver(), tx));
        Self {
            id,
            topic,
            stomp: raw.stomp,
            rx,
            translator,
        }
    }
}

impl<T> Subscription<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        self.rx.recv().await
    }

    /// UNSUBSCRIBE on the node. The shared WebSocket stays open for other
    /// subscriptions.
    pub async fn unsubscribe(self) -> Result<()> {
        self.translator.abort();
        self.stomp
            .unsubscribe(&self.id)
            .await
            .map_err(|e| Error::Stomp(format!("unsubscribe {}: {e}", self.topic)))
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.translator.abort();
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Stream for Subscription<T> {
    type Item = Message<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

async fn translate<T: DeserializeOwned>(
    mut raw: mpsc::UnboundedReceiver<Delivery>,
    out: mpsc::Sender<Message<T>>,
) {
    while let Some(delivery) = raw.recv().await {
        let msg = match delivery {
            Ok(frame) => match serde_json::from_slice::<T>(&frame.body) {
                Ok(body) => Message::Body {
                    body,
                    headers: frame.headers,
                },
                Err(e) => Message::DecodeError {
                    error: Error::Decode(e.to_string()),
                    raw: frame.body,
                },
            },
            Err(e) => Message::TransportError(Error::Stomp(e.to_string())),
        };
        if out.send(msg).await.is_err() {
            break;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscriber
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A topic of a capability, resolved lazily from node metadata.
pub struct Subscriber<T> {
    svc: Arc<ServiceDispatcher>,
    registry: Arc<PubSubRegistry>,
    topic_property: String,
    pubsub: Option<Arc<PubSubService>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Subscriber<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// `topic_property` names the node property holding the topic.
    pub fn new(
        svc: Arc<ServiceDispatcher>,
        registry: Arc<PubSubRegistry>,
        topic_property: impl Into<String>,
    ) -> Self {
        Self {
            svc,
            registry,
            topic_property: topic_property.into(),
            pubsub: None,
            _marker: PhantomData,
        }
    }

    /// Use `pubsub` instead of the one the capability advertises under
    /// `wsPubsubService`.
    pub fn via(mut self, pubsub: Arc<PubSubService>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    pub fn topic_property(&self) -> &str {
        &self.topic_property
    }

    pub async fn subscribe(&self, cancel: &CancellationToken) -> Result<Subscription<T>> {
        self.subscribe_with(&NodePick::Ordered, cancel).await
    }

    /// `pick` selects among the pub/sub service's nodes, not the
    /// capability's.
    pub async fn subscribe_with(
        &self,
        pick: &NodePick,
        cancel: &CancellationToken,
    ) -> Result<Subscription<T>> {
        let pubsub = match &self.pubsub {
            Some(p) => Arc::clone(p),
            None => {
                let name = self
                    .svc
                    .find_property_str(PROP_WS_PUBSUB_SERVICE, &NodePick::Ordered, cancel)
                    .await?;
                self.registry.get(&name)
            }
        };
        let topic = self
            .svc
            .find_property_str(&self.topic_property, &NodePick::Ordered, cancel)
            .await?;
        tracing::debug!(
            service = %self.svc.name(),
            pubsub = %pubsub.name(),
            topic = %topic,
            "subscribing"
        );
        let raw = pubsub.subscribe(pick, &topic, cancel).await?;
        Ok(Subscription::new(raw))
    }
}
