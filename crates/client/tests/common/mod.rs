//! In-memory control plane shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use px_grid::{Auth, ControlPlane, Error, Response, Result, ServiceNode};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const CONSUMER: &str = "px-consumer";

pub type Answer = Box<dyn Fn(&str) -> Result<Response> + Send + Sync>;

/// Holds every secret exchange open until released.
#[derive(Default)]
pub struct SecretGate {
    pub entered: Notify,
    pub release: Notify,
}

/// Answers lookups from a fixed node list, hands out `secret-<node>` and
/// records every capability call.
pub struct FakeControl {
    pub nodes: Mutex<Vec<ServiceNode>>,
    pub lookups: AtomicUsize,
    pub secrets: AtomicUsize,
    pub calls: Mutex<Vec<(String, Auth)>>,
    answer: Answer,
    gate: Option<SecretGate>,
}

impl FakeControl {
    pub fn new(nodes: Vec<ServiceNode>) -> Self {
        Self::answering(nodes, |_| Ok(Response::new(200, "{}")))
    }

    pub fn answering(
        nodes: Vec<ServiceNode>,
        answer: impl Fn(&str) -> Result<Response> + Send + Sync + 'static,
    ) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            lookups: AtomicUsize::new(0),
            secrets: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            answer: Box::new(answer),
            gate: None,
        }
    }

    pub fn with_secret_gate(mut self) -> Self {
        self.gate = Some(SecretGate::default());
        self
    }

    pub fn gate(&self) -> &SecretGate {
        self.gate.as_ref().expect("built without a secret gate")
    }

    /// Node list returned by the next lookups.
    pub fn set_nodes(&self, nodes: Vec<ServiceNode>) {
        *self.nodes.lock() = nodes;
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn secrets(&self) -> usize {
        self.secrets.load(Ordering::SeqCst)
    }

    pub fn call_urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(u, _)| u.clone()).collect()
    }
}

#[async_trait]
impl ControlPlane for FakeControl {
    fn node_name(&self) -> &str {
        CONSUMER
    }

    async fn service_lookup(&self, _service: &str, _cancel: &CancellationToken) -> Result<Vec<ServiceNode>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self.nodes.lock().clone())
    }

    async fn access_secret(&self, peer_node_name: &str, cancel: &CancellationToken) -> Result<String> {
        self.secrets.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = gate.release.notified() => {}
            }
        }
        Ok(format!("secret-{peer_node_name}"))
    }

    async fn rest_request(
        &self,
        url: &str,
        _payload: &Value,
        auth: Auth,
        _cancel: &CancellationToken,
    ) -> Result<Response> {
        self.calls.lock().push((url.to_owned(), auth));
        (self.answer)(url)
    }
}

pub fn node(node_name: &str, props: Value) -> ServiceNode {
    ServiceNode {
        name: "com.cisco.ise.session".into(),
        node_name: node_name.into(),
        properties: serde_json::from_value(props).unwrap(),
        secret: String::new(),
    }
}
