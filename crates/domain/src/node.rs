//! Service nodes as advertised by the control plane's `ServiceLookup`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Property under which a node advertises its REST base URL.
pub const PROP_REST_BASE_URL: &str = "restBaseUrl";
/// Property under which a pub/sub node advertises its WebSocket URL.
pub const PROP_WS_URL: &str = "wsUrl";
/// Property naming the pub/sub capability that carries a service's topics.
pub const PROP_WS_PUBSUB_SERVICE: &str = "wsPubsubService";

/// One advertised instance of a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNode {
    /// Logical capability name (e.g. `com.cisco.ise.session`).
    #[serde(default)]
    pub name: String,
    /// Unique node name within the capability's node set.
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    /// Access secret for this node; empty until provisioned. Never
    /// serialized.
    #[serde(skip)]
    pub secret: String,
}

impl ServiceNode {
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// String-valued property. `None` when missing or not a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }
}
