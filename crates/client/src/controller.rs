//! Control-plane calls: account lifecycle, service lookup, secret exchange.

use std::sync::Arc;

use async_trait::async_trait;
use px_domain::config::{ControlHost, PxGridConfig};
use px_domain::{Error, Result, ServiceNode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::transport::{Auth, Response, RestTransport};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreateResponse {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountState {
    Pending,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountActivateResponse {
    pub account_state: AccountState,
    #[serde(default)]
    pub version: String,
}

impl AccountActivateResponse {
    pub fn is_enabled(&self) -> bool {
        self.account_state == AccountState::Enabled
    }
}

#[derive(Debug, Deserialize)]
struct ServiceLookupResponse {
    #[serde(default)]
    services: Vec<ServiceNode>,
}

#[derive(Debug, Deserialize)]
struct AccessSecretResponse {
    #[serde(default)]
    secret: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a service dispatcher needs from the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// This consumer's node name, used to authenticate to peer nodes.
    fn node_name(&self) -> &str;

    async fn service_lookup(&self, service: &str, cancel: &CancellationToken)
        -> Result<Vec<ServiceNode>>;

    async fn access_secret(&self, peer_node_name: &str, cancel: &CancellationToken)
        -> Result<String>;

    /// A capability call against a node's REST base URL.
    async fn rest_request(
        &self,
        url: &str,
        payload: &Value,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Controller {
    hosts: Vec<ControlHost>,
    node_name: String,
    description: Option<String>,
    transport: Arc<dyn RestTransport>,
}

impl Controller {
    pub fn new(cfg: &PxGridConfig, transport: Arc<dyn RestTransport>) -> Self {
        Self {
            hosts: cfg.hosts.clone(),
            node_name: cfg.node_name.clone(),
            description: cfg.description.clone().filter(|d| !d.is_empty()),
            transport,
        }
    }

    /// Request a new account. Sent without credentials.
    pub async fn account_create(&self, cancel: &CancellationToken) -> Result<AccountCreateResponse> {
        let payload = json!({ "nodeName": self.node_name });
        let resp = self
            .control_rest("AccountCreate", &payload, Auth::None, cancel)
            .await?;
        match resp.status {
            403 | 503 => Err(Error::CreateForbidden),
            409 => Err(Error::CreateConflict),
            s if s > 299 => Err(Error::UnexpectedStatus(s)),
            _ => resp.json(),
        }
    }

    /// Ask for activation. Callers poll until the state is `ENABLED`.
    pub async fn account_activate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AccountActivateResponse> {
        let mut payload = json!({});
        if let Some(description) = &self.description {
            payload["description"] = json!(description);
        }
        let resp = self
            .control_rest("AccountActivate", &payload, Auth::Default, cancel)
            .await?;
        match resp.status {
            401 => Err(Error::ActivateUnauthorized),
            s if s > 299 => Err(Error::UnexpectedStatus(s)),
            _ => resp.json(),
        }
    }

    /// POST `operation` to each control host in order. The first host that
    /// answers at all wins; only transport failures move on.
    pub async fn control_rest(
        &self,
        operation: &str,
        payload: &Value,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        for host in &self.hosts {
            let url = host.control_url(operation);
            match self.transport.post(&url, payload, auth.clone(), cancel).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transport() => {
                    tracing::warn!(host = %host.host, operation, error = %e, "control host failed");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NoHostsAvailable)
    }
}

#[async_trait]
impl ControlPlane for Controller {
    fn node_name(&self) -> &str {
        &self.node_name
    }

    async fn service_lookup(
        &self,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceNode>> {
        let payload = json!({ "name": service });
        let resp = self
            .control_rest("ServiceLookup", &payload, Auth::Default, cancel)
            .await?;
        if resp.status > 299 {
            return Err(Error::UnexpectedStatus(resp.status));
        }
        let found: ServiceLookupResponse = resp.json()?;
        Ok(found.services)
    }

    async fn access_secret(
        &self,
        peer_node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let payload = json!({ "peerNodeName": peer_node_name });
        let resp = self
            .control_rest("AccessSecret", &payload, Auth::Default, cancel)
            .await?;
        if resp.status > 299 {
            return Err(Error::UnexpectedStatus(resp.status));
        }
        let found: AccessSecretResponse = resp.json()?;
        Ok(found.secret)
    }

    async fn rest_request(
        &self,
        url: &str,
        payload: &Value,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.transport.post(url, payload, auth, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every URL and answers from a script keyed by host.
    struct ScriptedTransport {
        seen: Mutex<Vec<(String, Auth, Value)>>,
        answer: fn(&str) -> Result<Response>,
    }

    #[async_trait]
    impl RestTransport for ScriptedTransport {
        async fn post(
            &self,
            url: &str,
            payload: &Value,
            auth: Auth,
            _cancel: &CancellationToken,
        ) -> Result<Response> {
            self.seen.lock().push((url.to_owned(), auth, payload.clone()));
            (self.answer)(url)
        }
    }

    fn controller(answer: fn(&str) -> Result<Response>) -> (Controller, Arc<ScriptedTransport>) {
        let mut cfg = PxGridConfig {
            node_name: "px-consumer".into(),
            description: Some("watcher".into()),
            ..Default::default()
        };
        cfg.add_host("pan-1", 0);
        cfg.add_host("pan-2", 9443);
        let transport = Arc::new(ScriptedTransport {
            seen: Mutex::new(Vec::new()),
            answer,
        });
        (Controller::new(&cfg, transport.clone()), transport)
    }

    #[tokio::test]
    async fn transport_failure_moves_to_next_host() {
        let (ctl, transport) = controller(|url| {
            if url.contains("pan-1") {
                Err(Error::Http("connection refused".into()))
            } else {
                Ok(Response::new(200, r#"{"services":[{"name":"s","nodeName":"n1"}]}"#))
            }
        });
        let nodes = ctl
            .service_lookup("s", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_name, "n1");

        let seen = transport.seen.lock();
        assert_eq!(seen[0].0, "https://pan-1:8910/pxgrid/control/ServiceLookup");
        assert_eq!(seen[1].0, "https://pan-2:9443/pxgrid/control/ServiceLookup");
        assert_eq!(seen[1].2, json!({"name": "s"}));
    }

    #[tokio::test]
    async fn application_error_does_not_fail_over() {
        let (ctl, transport) = controller(|_| Ok(Response::new(500, "")));
        let err = ctl
            .access_secret("ise-psn-1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnexpectedStatus(500));
        assert_eq!(transport.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn every_host_failing_is_no_hosts() {
        let (ctl, _) = controller(|_| Err(Error::Timeout("deadline".into())));
        let err = ctl
            .access_secret("ise-psn-1", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::NoHostsAvailable);
    }

    #[tokio::test]
    async fn create_is_unauthenticated() {
        let (ctl, transport) = controller(|_| Ok(Response::new(409, "")));
        let err = ctl.account_create(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, Error::CreateConflict);
        let seen = transport.seen.lock();
        assert_eq!(seen[0].1, Auth::None);
        assert_eq!(seen[0].2, json!({"nodeName": "px-consumer"}));
    }

    #[tokio::test]
    async fn create_status_mapping() {
        let (ctl, _) = controller(|_| Ok(Response::new(403, "")));
        let cancel = CancellationToken::new();
        assert_eq!(ctl.account_create(&cancel).await.unwrap_err(), Error::CreateForbidden);

        let (ctl, _) = controller(|_| Ok(Response::new(503, "")));
        assert_eq!(ctl.account_create(&cancel).await.unwrap_err(), Error::CreateForbidden);

        let (ctl, _) = controller(|_| Ok(Response::new(418, "")));
        assert_eq!(
            ctl.account_create(&cancel).await.unwrap_err(),
            Error::UnexpectedStatus(418)
        );
    }

    #[tokio::test]
    async fn create_returns_generated_password() {
        let (ctl, _) = controller(|_| {
            Ok(Response::new(200, r#"{"nodeName":"px-consumer","password":"gen-pw"}"#))
        });
        let created = ctl.account_create(&CancellationToken::new()).await.unwrap();
        assert_eq!(created.password, "gen-pw");
    }

    #[tokio::test]
    async fn activate_sends_description_and_reports_state() {
        let (ctl, transport) = controller(|_| {
            Ok(Response::new(200, r#"{"accountState":"PENDING","version":"2.0"}"#))
        });
        let state = ctl.account_activate(&CancellationToken::new()).await.unwrap();
        assert_eq!(state.account_state, AccountState::Pending);
        assert!(!state.is_enabled());
        let seen = transport.seen.lock();
        assert_eq!(seen[0].1, Auth::Default);
        assert_eq!(seen[0].2, json!({"description": "watcher"}));
    }

    #[tokio::test]
    async fn activate_unauthorized() {
        let (ctl, _) = controller(|_| Ok(Response::new(401, "")));
        assert_eq!(
            ctl.account_activate(&CancellationToken::new()).await.unwrap_err(),
            Error::ActivateUnauthorized
        );
    }

    #[tokio::test]
    async fn cancellation_is_not_failed_over() {
        let (ctl, transport) = controller(|_| Err(Error::Cancelled));
        let err = ctl
            .service_lookup("s", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
        assert_eq!(transport.seen.lock().len(), 1);
    }
}
