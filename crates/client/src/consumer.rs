//! Entry point tying configuration, transport, control plane and
//! capabilities together.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use px_domain::config::{ConfigSeverity, PxGridConfig};
use px_domain::{Error, Result};

use crate::capabilities::{AncConfig, EndpointAsset, SessionDirectory, SystemHealth, TrustSecConfig};
use crate::controller::Controller;
use crate::pubsub::{Dialer, PubSubRegistry, PubSubService};
use crate::service::ServiceDispatcher;
use crate::transport::Transport;

/// A pxGrid client node.
///
/// Capability handles are cheap; they share one dispatcher per capability
/// name, so node lists and secrets are looked up once per consumer.
pub struct PxGridConsumer {
    config: PxGridConfig,
    transport: Arc<Transport>,
    controller: Arc<Controller>,
    registry: Arc<PubSubRegistry>,
    services: RwLock<HashMap<String, Arc<ServiceDispatcher>>>,
}

impl PxGridConsumer {
    /// Validate `config` and build the client. Validation errors are
    /// reported together as one [`Error::Config`]; warnings are logged.
    pub fn new(config: PxGridConfig) -> Result<Self> {
        let mut errors = Vec::new();
        for issue in config.validate() {
            match issue.severity {
                ConfigSeverity::Error => errors.push(issue.to_string()),
                ConfigSeverity::Warning => tracing::warn!(field = %issue.field, "{}", issue.message),
            }
        }
        if !errors.is_empty() {
            return Err(Error::Config(errors.join("; ")));
        }

        let transport = Arc::new(Transport::new(&config)?);
        let controller = Arc::new(Controller::new(&config, transport.clone()));
        let dialer = Arc::new(Dialer::new(
            Arc::clone(transport.resolver()),
            Arc::clone(transport.tls()),
            config.pubsub.handshake_timeout(),
        ));
        let registry = Arc::new(PubSubRegistry::new(
            controller.clone(),
            dialer,
            config.pubsub.clone(),
        ));

        tracing::info!(
            node_name = %config.node_name,
            hosts = config.hosts.len(),
            "pxGrid consumer ready"
        );
        Ok(Self {
            config,
            transport,
            controller,
            registry,
            services: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &PxGridConfig {
        &self.config
    }

    pub fn control(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Dispatcher for any capability by name.
    pub fn service(&self, name: &str) -> Arc<ServiceDispatcher> {
        if let Some(svc) = self.services.read().get(name) {
            return Arc::clone(svc);
        }
        let mut services = self.services.write();
        let svc = services
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(ServiceDispatcher::new(name, self.controller.clone())));
        Arc::clone(svc)
    }

    /// A pub/sub capability, e.g. `com.cisco.ise.pubsub`.
    pub fn pubsub(&self, name: &str) -> Arc<PubSubService> {
        self.registry.get(name)
    }

    pub fn session_directory(&self) -> SessionDirectory {
        SessionDirectory::new(
            self.service(crate::capabilities::session_directory::SERVICE_NAME),
            Arc::clone(&self.registry),
        )
    }

    pub fn anc_config(&self) -> AncConfig {
        AncConfig::new(
            self.service(crate::capabilities::anc_config::SERVICE_NAME),
            Arc::clone(&self.registry),
        )
    }

    pub fn endpoint_asset(&self) -> EndpointAsset {
        EndpointAsset::new(
            self.service(crate::capabilities::endpoint_asset::SERVICE_NAME),
            Arc::clone(&self.registry),
        )
    }

    pub fn system_health(&self) -> SystemHealth {
        SystemHealth::new(self.service(crate::capabilities::system_health::SERVICE_NAME))
    }

    pub fn trustsec_config(&self) -> TrustSecConfig {
        TrustSecConfig::new(
            self.service(crate::capabilities::trustsec_config::SERVICE_NAME),
            Arc::clone(&self.registry),
        )
    }

    /// Close every pub/sub connection this consumer opened.
    pub async fn disconnect(&self) {
        self.registry.disconnect_all().await;
    }
}
