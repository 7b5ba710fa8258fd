//! `com.cisco.ise.config.anc`: Adaptive Network Control policies and their
//! assignment to endpoints.

use std::sync::Arc;

use px_domain::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{list_call, require, Capability};
use crate::call::{Call, NoResultCall};
use crate::pubsub::PubSubRegistry;
use crate::service::ServiceDispatcher;
use crate::subscription::Subscriber;

pub const SERVICE_NAME: &str = "com.cisco.ise.config.anc";

pub const PROP_STATUS_TOPIC: &str = "statusTopic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    Quarantine,
    ShutDown,
    PortBounce,
    ReAuthenticate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub name: String,
    pub actions: Vec<PolicyAction>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Success,
    Failure,
    Running,
}

/// Outcome of an apply/clear request, also published on the status topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    pub operation_id: String,
    pub status: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Endpoint {
    pub mac_address: String,
    pub policy_name: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPolicyRequest {
    pub policy: String,
    pub mac_address: String,
    pub nas_ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas_port_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearPolicyRequest {
    pub mac_address: String,
    pub nas_ip_address: String,
}

pub struct AncConfig {
    svc: Arc<ServiceDispatcher>,
    registry: Arc<PubSubRegistry>,
}

impl Capability for AncConfig {
    const NAME: &'static str = SERVICE_NAME;

    fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.svc
    }
}

impl AncConfig {
    pub fn new(svc: Arc<ServiceDispatcher>, registry: Arc<PubSubRegistry>) -> Self {
        Self { svc, registry }
    }

    // ── policies ─────────────────────────────────────────────────────

    pub fn get_policies(&self) -> Call<Vec<Policy>> {
        list_call(&self.svc, "getPolicies", json!({}), "policies")
    }

    pub fn get_policy_by_name(&self, name: &str) -> Call<Option<Policy>> {
        if let Err(e) = require(&[("name", name)]) {
            return Call::failed(e);
        }
        self.call("getPolicyByName", json!({ "name": name }))
    }

    pub fn create_policy(&self, policy: &Policy) -> NoResultCall {
        if policy.name.is_empty() || policy.actions.is_empty() {
            return NoResultCall::failed(Error::InvalidInput(
                "policy needs a name and at least one action".into(),
            ));
        }
        let payload = json!({ "name": policy.name, "actions": policy.actions });
        NoResultCall::new(Arc::clone(&self.svc), "createPolicy", payload)
    }

    pub fn delete_policy_by_name(&self, name: &str) -> NoResultCall {
        if let Err(e) = require(&[("name", name)]) {
            return NoResultCall::failed(e);
        }
        NoResultCall::new(Arc::clone(&self.svc), "deletePolicyByName", json!({ "name": name }))
    }

    // ── endpoints ────────────────────────────────────────────────────

    pub fn get_endpoints(&self) -> Call<Vec<Endpoint>> {
        list_call(&self.svc, "getEndpoints", json!({}), "endpoints")
    }

    pub fn get_endpoint_policies(&self) -> Call<Vec<Endpoint>> {
        list_call(&self.svc, "getEndpointPolicies", json!({}), "endpoints")
    }

    pub fn get_endpoint_by_mac(&self, mac_address: &str) -> Call<Option<Endpoint>> {
        if let Err(e) = require(&[("macAddress", mac_address)]) {
            return Call::failed(e);
        }
        self.call("getEndpointByMAC", json!({ "macAddress": mac_address }))
    }

    pub fn get_endpoint_by_nas_ip_address(
        &self,
        mac_address: &str,
        nas_ip_address: &str,
    ) -> Call<Option<Endpoint>> {
        if let Err(e) = require(&[("macAddress", mac_address), ("nasIpAddress", nas_ip_address)]) {
            return Call::failed(e);
        }
        self.call(
            "getEndpointByNasIpAddress",
            json!({ "macAddress": mac_address, "nasIpAddress": nas_ip_address }),
        )
    }

    pub fn apply_endpoint_by_ip_address(
        &self,
        ip_address: &str,
        policy_name: &str,
    ) -> Call<Option<OperationStatus>> {
        self.by_address("applyEndpointByIpAddress", "ipAddress", ip_address, policy_name)
    }

    pub fn apply_endpoint_by_mac_address(
        &self,
        mac_address: &str,
        policy_name: &str,
    ) -> Call<Option<OperationStatus>> {
        self.by_address("applyEndpointByMacAddress", "macAddress", mac_address, policy_name)
    }

    pub fn clear_endpoint_by_ip_address(
        &self,
        ip_address: &str,
        policy_name: &str,
    ) -> Call<Option<OperationStatus>> {
        self.by_address("clearEndpointByIpAddress", "ipAddress", ip_address, policy_name)
    }

    pub fn clear_endpoint_by_mac_address(
        &self,
        mac_address: &str,
        policy_name: &str,
    ) -> Call<Option<OperationStatus>> {
        self.by_address("clearEndpointByMacAddress", "macAddress", mac_address, policy_name)
    }

    pub fn apply_endpoint_policy(&self, request: &ApplyPolicyRequest) -> Call<Option<OperationStatus>> {
        if let Err(e) = require(&[
            ("policy", request.policy.as_str()),
            ("macAddress", request.mac_address.as_str()),
            ("nasIpAddress", request.nas_ip_address.as_str()),
        ]) {
            return Call::failed(e);
        }
        match serde_json::to_value(request) {
            Ok(payload) => self.call("applyEndpointPolicy", payload),
            Err(e) => Call::failed(e.into()),
        }
    }

    pub fn clear_endpoint_policy(&self, request: &ClearPolicyRequest) -> Call<Option<OperationStatus>> {
        if let Err(e) = require(&[
            ("macAddress", request.mac_address.as_str()),
            ("nasIpAddress", request.nas_ip_address.as_str()),
        ]) {
            return Call::failed(e);
        }
        match serde_json::to_value(request) {
            Ok(payload) => self.call("clearEndpointPolicy", payload),
            Err(e) => Call::failed(e.into()),
        }
    }

    pub fn get_operation_status(&self, operation_id: &str) -> Call<Option<OperationStatus>> {
        if let Err(e) = require(&[("operationId", operation_id)]) {
            return Call::failed(e);
        }
        self.call("getOperationStatus", json!({ "operationId": operation_id }))
    }

    // ── topics ───────────────────────────────────────────────────────

    pub fn on_status_topic(&self) -> Subscriber<OperationStatus> {
        Subscriber::new(Arc::clone(&self.svc), Arc::clone(&self.registry), PROP_STATUS_TOPIC)
    }

    fn call<R>(&self, name: &str, payload: Value) -> Call<Option<R>>
    where
        R: serde::de::DeserializeOwned + 'static,
    {
        Call::optional(Arc::clone(&self.svc), name, payload)
    }

    fn by_address(
        &self,
        name: &str,
        address_key: &str,
        address: &str,
        policy_name: &str,
    ) -> Call<Option<OperationStatus>> {
        if let Err(e) = require(&[(address_key, address), ("policyName", policy_name)]) {
            return Call::failed(e);
        }
        let mut payload = serde_json::Map::new();
        payload.insert(address_key.to_owned(), Value::String(address.to_owned()));
        payload.insert("policyName".to_owned(), Value::String(policy_name.to_owned()));
        self.call(name, Value::Object(payload))
    }
}
