//! Pub/sub over STOMP-on-WebSocket.
//!
//! A pub/sub capability (e.g. `com.cisco.ise.pubsub`) advertises a `wsUrl`
//! per node. Every distinct URL gets one [`PubSubEndpoint`] holding a single
//! shared STOMP session; subscriptions from any capability ride on it.

mod bridge;
mod dialer;
mod endpoint;

pub use dialer::{Dialer, WsStream};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use px_domain::config::PubSubConfig;
use px_domain::node::PROP_WS_URL;
use px_domain::{Error, Result, ServiceNode};
use px_stomp::{StompClient, StompSubscription};
use tokio_util::sync::CancellationToken;

use crate::controller::ControlPlane;
use crate::picker::{NodePick, Picked};
use crate::service::ServiceDispatcher;
use endpoint::PubSubEndpoint;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One [`PubSubService`] per pub/sub capability name.
pub struct PubSubRegistry {
    control: Arc<dyn ControlPlane>,
    dialer: Arc<Dialer>,
    settings: PubSubConfig,
    services: RwLock<HashMap<String, Arc<PubSubService>>>,
}

impl PubSubRegistry {
    pub fn new(control: Arc<dyn ControlPlane>, dialer: Arc<Dialer>, settings: PubSubConfig) -> Self {
        Self {
            control,
            dialer,
            settings,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<PubSubService> {
        if let Some(svc) = self.services.read().get(name) {
            return Arc::clone(svc);
        }
        let mut services = self.services.write();
        let svc = services.entry(name.to_owned()).or_insert_with(|| {
            tracing::debug!(service = %name, "new pub/sub service");
            Arc::new(PubSubService::new(
                Arc::new(ServiceDispatcher::new(name, Arc::clone(&self.control))),
                Arc::clone(&self.dialer),
                self.settings.clone(),
            ))
        });
        Arc::clone(svc)
    }

    /// Disconnect every endpoint of every pub/sub service.
    pub async fn disconnect_all(&self) {
        let services: Vec<_> = self.services.read().values().cloned().collect();
        for svc in services {
            svc.disconnect().await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A pub/sub capability: its own node set plus the endpoint cache.
pub struct PubSubService {
    dispatcher: Arc<ServiceDispatcher>,
    dialer: Arc<Dialer>,
    settings: PubSubConfig,
    endpoints: RwLock<HashMap<String, Arc<PubSubEndpoint>>>,
}

impl PubSubService {
    pub fn new(dispatcher: Arc<ServiceDispatcher>, dialer: Arc<Dialer>, settings: PubSubConfig) -> Self {
        Self {
            dispatcher,
            dialer,
            settings,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.dispatcher.name()
    }

    pub fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.dispatcher
    }

    /// `wsUrl` of the first node advertising one.
    pub async fn ws_url(&self, cancel: &CancellationToken) -> Result<String> {
        self.dispatcher
            .find_property_str(PROP_WS_URL, &NodePick::Ordered, cancel)
            .await
    }

    /// Subscribe to `topic` on the first node, in `pick` order, that can
    /// be connected to.
    pub async fn subscribe(
        &self,
        pick: &NodePick,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<TopicSubscription> {
        let (generation, nodes) = self.dispatcher.checked_snapshot(cancel).await?;
        let mut picker = pick.picker(nodes);
        loop {
            let Picked {
                index,
                node,
                has_more,
            } = picker.pick()?;
            match self.subscribe_on(generation, index, &node, topic, cancel).await {
                Ok(sub) => return Ok(sub),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if has_more => {
                    tracing::warn!(
                        service = %self.name(),
                        node = %node.node_name,
                        error = %e,
                        "pub/sub subscribe failed, trying next node"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn subscribe_on(
        &self,
        generation: u64,
        index: usize,
        node: &ServiceNode,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<TopicSubscription> {
        let ws_url = match node.property(PROP_WS_URL) {
            None => return Err(Error::PropertyNotFound(PROP_WS_URL.into())),
            Some(v) => match v.as_str() {
                Some("") => return Err(Error::PropertyNotFound(PROP_WS_URL.into())),
                Some(s) => s,
                None => return Err(Error::PropertyNotString(PROP_WS_URL.into())),
            },
        };
        let endpoint = self.endpoint(ws_url);

        let secret = self
            .dispatcher
            .node_secret(generation, index, node, cancel)
            .await?;

        let username = self.dispatcher.control().node_name();
        let stomp = endpoint.connect(username, &secret, cancel).await?;
        let inner = stomp
            .subscribe(topic)
            .await
            .map_err(|e| Error::Stomp(format!("subscribe {topic}: {e}")))?;
        tracing::debug!(ws_url = %ws_url, topic = %topic, "subscribed");
        Ok(TopicSubscription { stomp, inner })
    }

    /// Cached endpoint for `ws_url`, created on first use.
    fn endpoint(&self, ws_url: &str) -> Arc<PubSubEndpoint> {
        if let Some(ep) = self.endpoints.read().get(ws_url) {
            return Arc::clone(ep);
        }
        let mut endpoints = self.endpoints.write();
        let ep = endpoints.entry(ws_url.to_owned()).or_insert_with(|| {
            tracing::debug!(ws_url = %ws_url, "new pub/sub endpoint");
            Arc::new(PubSubEndpoint::new(
                ws_url,
                Arc::clone(&self.dialer),
                self.settings.clone(),
            ))
        });
        Arc::clone(ep)
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    pub async fn disconnect(&self) {
        tracing::debug!(
            service = %self.name(),
            endpoints = self.endpoint_count(),
            "disconnecting pub/sub service"
        );
        let endpoints: Vec<_> = self.endpoints.read().values().cloned().collect();
        for ep in endpoints {
            ep.disconnect().await;
        }
    }
}

/// A raw STOMP subscription and the session it lives on.
pub struct TopicSubscription {
    pub(crate) stomp: Arc<StompClient>,
    pub(crate) inner: StompSubscription,
}

impl TopicSubscription {
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn destination(&self) -> &str {
        self.inner.destination()
    }
}
