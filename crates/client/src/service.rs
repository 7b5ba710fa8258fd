//! Per-capability node discovery, secret provisioning and REST dispatch.

use std::sync::Arc;

use parking_lot::RwLock;
use px_domain::node::PROP_REST_BASE_URL;
use px_domain::trace::TraceEvent;
use px_domain::{Error, Result, ServiceNode};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::controller::ControlPlane;
use crate::picker::{NodePick, Picked};
use crate::transport::{Auth, Response};

/// The node list of one capability together with the lookup that produced
/// it. Every successful lookup bumps `generation`; secret writes carry the
/// generation they were read under and are dropped if it moved.
#[derive(Debug, Default)]
struct NodeSet {
    generation: u64,
    nodes: Arc<Vec<ServiceNode>>,
}

/// Shared engine behind every capability facade.
pub struct ServiceDispatcher {
    name: String,
    control: Arc<dyn ControlPlane>,
    nodes: RwLock<NodeSet>,
    /// Serializes the lazy lookup in [`check_nodes`](Self::check_nodes).
    lookup_lock: Mutex<()>,
}

impl ServiceDispatcher {
    pub fn new(name: impl Into<String>, control: Arc<dyn ControlPlane>) -> Self {
        Self {
            name: name.into(),
            control,
            nodes: RwLock::new(NodeSet::default()),
            lookup_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn control(&self) -> &Arc<dyn ControlPlane> {
        &self.control
    }

    /// Current node snapshot. Empty until the first lookup.
    pub fn nodes(&self) -> Arc<Vec<ServiceNode>> {
        Arc::clone(&self.nodes.read().nodes)
    }

    fn snapshot(&self) -> (u64, Arc<Vec<ServiceNode>>) {
        let set = self.nodes.read();
        (set.generation, Arc::clone(&set.nodes))
    }

    /// [`check_nodes`](Self::check_nodes), then the node list together
    /// with the generation it belongs to. Pickers run over this snapshot
    /// and secrets for picked nodes go through
    /// [`node_secret`](Self::node_secret) with the same generation.
    pub(crate) async fn checked_snapshot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(u64, Arc<Vec<ServiceNode>>)> {
        self.check_nodes(cancel).await?;
        Ok(self.snapshot())
    }

    // ── discovery ────────────────────────────────────────────────────

    /// Fetch the node list from the control plane and replace the cached
    /// one wholesale. Secrets provisioned for the old list are gone.
    pub async fn lookup(&self, cancel: &CancellationToken) -> Result<Arc<Vec<ServiceNode>>> {
        tracing::debug!(service = %self.name, "looking up service");
        let found = Arc::new(self.control.service_lookup(&self.name, cancel).await?);
        {
            let mut set = self.nodes.write();
            set.generation += 1;
            set.nodes = Arc::clone(&found);
        }
        TraceEvent::ServiceLookup {
            service: self.name.clone(),
            nodes: found.len(),
        }
        .emit();
        Ok(found)
    }

    /// Look up only if nothing is cached. An empty result after a
    /// successful lookup is `ServiceUnavailable`.
    pub async fn check_nodes(&self, cancel: &CancellationToken) -> Result<Arc<Vec<ServiceNode>>> {
        let nodes = self.nodes();
        if !nodes.is_empty() {
            return Ok(nodes);
        }

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            g = self.lookup_lock.lock() => g,
        };
        // Another caller may have finished the lookup while we waited.
        let nodes = self.nodes();
        if !nodes.is_empty() {
            return Ok(nodes);
        }

        let nodes = self.lookup(cancel).await?;
        tracing::debug!(service = %self.name, nodes = nodes.len(), "nodes found");
        if nodes.is_empty() {
            return Err(Error::ServiceUnavailable(self.name.clone()));
        }
        Ok(nodes)
    }

    pub fn find_node_index_by_name(&self, node_name: &str) -> Result<usize> {
        self.nodes
            .read()
            .nodes
            .iter()
            .position(|n| n.node_name == node_name)
            .ok_or_else(|| Error::NodeNotFound(node_name.to_owned()))
    }

    /// Value of `property` on the first node, in `pick` order, that carries
    /// it.
    pub async fn find_property(
        &self,
        property: &str,
        pick: &NodePick,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let nodes = self.check_nodes(cancel).await?;
        let mut picker = pick.picker(nodes);
        loop {
            let Picked { node, has_more, .. } = picker.pick()?;
            if let Some(value) = node.property(property) {
                return Ok(value.clone());
            }
            if !has_more {
                return Err(Error::PropertyNotFound(property.to_owned()));
            }
        }
    }

    pub async fn find_property_str(
        &self,
        property: &str,
        pick: &NodePick,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match self.find_property(property, pick, cancel).await? {
            Value::String(s) => Ok(s),
            _ => Err(Error::PropertyNotString(property.to_owned())),
        }
    }

    // ── secrets ──────────────────────────────────────────────────────

    pub async fn update_node_secret(&self, index: usize, cancel: &CancellationToken) -> Result<String> {
        let (generation, nodes) = self.snapshot();
        let node = nodes.get(index).ok_or(Error::InvalidNodeIndex(index))?;
        self.provision(generation, index, &node.node_name, cancel).await
    }

    pub async fn update_node_secret_by_name(
        &self,
        node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let index = self.find_node_index_by_name(node_name)?;
        self.update_node_secret(index, cancel).await
    }

    /// Provision a secret for every node, looking up first if needed.
    pub async fn update_secrets(&self, cancel: &CancellationToken) -> Result<()> {
        self.check_nodes(cancel).await?;
        let (generation, nodes) = self.snapshot();
        for (index, node) in nodes.iter().enumerate() {
            self.provision(generation, index, &node.node_name, cancel).await?;
        }
        Ok(())
    }

    /// Secret of `node`, picked at `index` from the snapshot taken under
    /// `generation`. Provisioned on first use.
    pub(crate) async fn node_secret(
        &self,
        generation: u64,
        index: usize,
        node: &ServiceNode,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if node.has_secret() {
            return Ok(node.secret.clone());
        }
        self.provision(generation, index, &node.node_name, cancel).await
    }

    /// Fetch the secret for `node_name` and store it at `index` unless the
    /// node set was replaced in the meantime.
    async fn provision(
        &self,
        generation: u64,
        index: usize,
        node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        tracing::debug!(service = %self.name, node = %node_name, "updating node secret");
        let secret = self
            .control
            .access_secret(node_name, cancel)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                e => Error::Secret {
                    node: node_name.to_owned(),
                    message: e.to_string(),
                },
            })?;

        {
            let mut set = self.nodes.write();
            let current = set.generation == generation
                && set.nodes.get(index).is_some_and(|n| n.node_name == node_name);
            if current {
                Arc::make_mut(&mut set.nodes)[index].secret = secret.clone();
            } else {
                tracing::debug!(
                    service = %self.name,
                    node = %node_name,
                    "node set replaced during provisioning, secret not cached"
                );
            }
        }

        TraceEvent::SecretProvisioned {
            service: self.name.clone(),
            node: node_name.to_owned(),
        }
        .emit();
        Ok(secret)
    }

    // ── dispatch ─────────────────────────────────────────────────────

    /// POST `payload` to `<restBaseUrl>/<call>` on the nodes chosen by
    /// `pick`, authenticating with each node's secret.
    ///
    /// Nodes without a base URL are skipped. Transport failures move on to
    /// the next candidate while one remains. The first node that answers
    /// with any status wins; interpreting that status is up to the caller.
    pub async fn call(
        &self,
        call: &str,
        payload: &Value,
        pick: &NodePick,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let (generation, nodes) = self.checked_snapshot(cancel).await?;
        let mut picker = pick.picker(nodes);

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Picked {
                index,
                node,
                has_more,
            } = picker.pick()?;

            let Some(base) = node.property_str(PROP_REST_BASE_URL) else {
                tracing::debug!(service = %self.name, node = %node.node_name, "node has no restBaseUrl");
                if has_more {
                    continue;
                }
                break;
            };

            let secret = self.node_secret(generation, index, &node, cancel).await?;

            let url = format!("{}{call}", ensure_trailing_slash(base));
            let auth = Auth::basic(self.control.node_name(), secret);
            match self.control.rest_request(&url, payload, auth, cancel).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transport() && has_more => {
                    tracing::warn!(
                        service = %self.name,
                        node = %node.node_name,
                        error = %e,
                        "call failed, trying next node"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::AllNodesFailed(call.to_owned()))
    }
}

fn ensure_trailing_slash(s: &str) -> String {
    if s.ends_with('/') {
        s.to_owned()
    } else {
        format!("{s}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_added_once() {
        assert_eq!(ensure_trailing_slash("https://psn:8910/pxgrid/ise/session"), "https://psn:8910/pxgrid/ise/session/");
        assert_eq!(ensure_trailing_slash("https://psn/x/"), "https://psn/x/");
        assert_eq!(ensure_trailing_slash(""), "/");
    }
}
