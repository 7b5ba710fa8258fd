//! `com.cisco.ise.config.trustsec`: security groups, SGACLs, virtual
//! networks and the egress policy matrix.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{list_call, Capability, OperationType};
use crate::call::Call;
use crate::pubsub::PubSubRegistry;
use crate::service::ServiceDispatcher;
use crate::subscription::Subscriber;

pub const SERVICE_NAME: &str = "com.cisco.ise.config.trustsec";

pub const PROP_SECURITY_GROUP_TOPIC: &str = "securityGroupTopic";
pub const PROP_SECURITY_GROUP_ACL_TOPIC: &str = "securityGroupAclTopic";
pub const PROP_SECURITY_GROUP_VN_VLAN_TOPIC: &str = "securityGroupVnVlanTopic";
pub const PROP_VIRTUAL_NETWORK_TOPIC: &str = "virtualnetworkTopic";
pub const PROP_EGRESS_POLICY_TOPIC: &str = "egressPolicyTopic";

// ── filters ─────────────────────────────────────────────────────────

/// Narrows a TrustSec list query. Unset fields are left out of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustSecFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<String>,
}

impl TrustSecFilter {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn start_index(mut self, start_index: u32) -> Self {
        self.start_index = Some(start_index);
        self
    }

    pub fn record_count(mut self, record_count: u32) -> Self {
        self.record_count = Some(record_count);
        self
    }

    pub fn start_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.start_timestamp = Some(ts.into());
        self
    }

    pub fn end_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.end_timestamp = Some(ts.into());
        self
    }
}

/// [`TrustSecFilter`] plus the egress matrix to read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressPolicyFilter {
    #[serde(flatten)]
    pub common: TrustSecFilter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix_id: Option<String>,
}

impl EgressPolicyFilter {
    pub fn matrix_id(mut self, matrix_id: impl Into<String>) -> Self {
        self.matrix_id = Some(matrix_id.into());
        self
    }
}

impl From<TrustSecFilter> for EgressPolicyFilter {
    fn from(common: TrustSecFilter) -> Self {
        Self {
            common,
            matrix_id: None,
        }
    }
}

// ── records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tag: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroupAcl {
    pub id: String,
    pub is_deleted: bool,
    pub name: String,
    pub description: String,
    pub ip_version: String,
    pub acl: String,
    pub modelled_content: Value,
    pub generation_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    pub additional_attributes: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EgressPolicy {
    pub id: String,
    pub name: String,
    pub matrix_id: String,
    pub status: String,
    pub description: String,
    pub source_security_group_id: String,
    pub destination_security_group_id: String,
    pub sgacl_ids: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EgressMatrix {
    pub id: String,
    pub name: String,
    pub description: String,
    pub monitor_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroups {
    pub total_count: u64,
    pub security_groups: Vec<SecurityGroup>,
    pub deleted_security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroupAcls {
    pub total_count: u64,
    pub security_group_acls: Vec<SecurityGroupAcl>,
    pub deleted_security_group_acls: Vec<SecurityGroupAcl>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualNetworks {
    pub total_count: u64,
    pub virtual_networks: Vec<VirtualNetwork>,
    pub deleted_virtual_networks: Vec<VirtualNetwork>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EgressPolicies {
    pub total_count: u64,
    pub egress_policies: Vec<EgressPolicy>,
    pub deleted_egress_policies: Vec<EgressPolicy>,
}

// ── topic messages ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupTopicMessage {
    #[serde(default)]
    pub sequence: u64,
    #[serde(rename = "operation")]
    pub op_type: OperationType,
    #[serde(rename = "securityGroup")]
    pub security_group: SecurityGroup,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityGroupAclTopicMessage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub ip_version: String,
    pub acl: String,
    pub modelled_content: Value,
    pub generation_id: String,
    pub is_read_only: bool,
    pub sequence: u64,
    pub deleted: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VirtualNetworkTopicMessage {
    pub id: String,
    pub name: String,
    pub additional_attributes: String,
    pub sequence: u64,
    pub deleted: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EgressPolicyTopicMessage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub source_sgt_id: String,
    pub source_sgt_name: String,
    pub destination_sgt_id: String,
    pub destination_sgt_name: String,
    pub matrix_cell_status: String,
    pub sgacl_ids: Vec<String>,
    pub default_rule: String,
    pub sequence: u64,
    pub deleted: bool,
    pub timestamp: String,
}

// ── facade ──────────────────────────────────────────────────────────

pub struct TrustSecConfig {
    svc: Arc<ServiceDispatcher>,
    registry: Arc<PubSubRegistry>,
}

impl Capability for TrustSecConfig {
    const NAME: &'static str = SERVICE_NAME;

    fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.svc
    }
}

impl TrustSecConfig {
    pub fn new(svc: Arc<ServiceDispatcher>, registry: Arc<PubSubRegistry>) -> Self {
        Self { svc, registry }
    }

    pub fn get_security_groups(&self, filter: &TrustSecFilter) -> Call<SecurityGroups> {
        self.call("getSecurityGroups", filter)
    }

    pub fn get_security_group_acls(&self, filter: &TrustSecFilter) -> Call<SecurityGroupAcls> {
        self.call("getSecurityGroupAcls", filter)
    }

    pub fn get_virtual_networks(&self, filter: &TrustSecFilter) -> Call<VirtualNetworks> {
        self.call("getVirtualNetwork", filter)
    }

    pub fn get_egress_policies(&self, filter: &EgressPolicyFilter) -> Call<EgressPolicies> {
        self.call("getEgressPolicies", filter)
    }

    pub fn get_egress_matrices(&self) -> Call<Vec<EgressMatrix>> {
        list_call(&self.svc, "getEgressMatrices", json!({}), "egressMatrices")
    }

    pub fn on_security_group_topic(&self) -> Subscriber<SecurityGroupTopicMessage> {
        self.subscriber(PROP_SECURITY_GROUP_TOPIC)
    }

    pub fn on_security_group_acl_topic(&self) -> Subscriber<SecurityGroupAclTopicMessage> {
        self.subscriber(PROP_SECURITY_GROUP_ACL_TOPIC)
    }

    /// The VN/VLAN mapping messages have no fixed shape.
    pub fn on_security_group_vn_vlan_topic(&self) -> Subscriber<Value> {
        self.subscriber(PROP_SECURITY_GROUP_VN_VLAN_TOPIC)
    }

    pub fn on_virtual_network_topic(&self) -> Subscriber<VirtualNetworkTopicMessage> {
        self.subscriber(PROP_VIRTUAL_NETWORK_TOPIC)
    }

    pub fn on_egress_policy_topic(&self) -> Subscriber<EgressPolicyTopicMessage> {
        self.subscriber(PROP_EGRESS_POLICY_TOPIC)
    }

    fn call<R, F>(&self, name: &str, filter: &F) -> Call<R>
    where
        R: serde::de::DeserializeOwned + Default + 'static,
        F: Serialize,
    {
        match serde_json::to_value(filter) {
            Ok(payload) => Call::new(Arc::clone(&self.svc), name, payload),
            Err(e) => Call::failed(e.into()),
        }
    }

    fn subscriber<T>(&self, topic_property: &str) -> Subscriber<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        Subscriber::new(Arc::clone(&self.svc), Arc::clone(&self.registry), topic_property)
    }
}
