//! `com.cisco.ise.session`: active sessions and user groups.

use std::sync::Arc;

use px_domain::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{list_call, require, sparse, Capability};
use crate::call::Call;
use crate::pubsub::PubSubRegistry;
use crate::service::ServiceDispatcher;
use crate::subscription::Subscriber;

pub const SERVICE_NAME: &str = "com.cisco.ise.session";

pub const PROP_SESSION_TOPIC: &str = "sessionTopic";
pub const PROP_SESSION_TOPIC_ALL: &str = "sessionTopicAll";
pub const PROP_GROUP_TOPIC: &str = "groupTopic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Authenticating,
    Authenticated,
    Postured,
    Started,
    Disconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    pub timestamp: String,
    pub state: Option<SessionState>,
    pub mac_address: String,
    pub ip_addresses: Vec<String>,
    pub calling_station_id: String,
    pub called_station_id: String,
    pub audit_session_id: String,
    pub user_name: String,
    pub nas_ip_address: String,
    pub nas_port_id: String,
    pub nas_port_type: String,
    pub nas_identifier: String,
    pub selected_authz_profiles: Vec<String>,
    pub posture_status: String,
    pub endpoint_profile: String,
    pub endpoint_operating_system: String,
    pub cts_security_group: String,
    pub ad_normalized_user: String,
    pub ad_user_domain_name: String,
    pub ad_host_domain_name: String,
    pub ad_user_net_bios_name: String,
    pub ad_host_net_bios_name: String,
    pub providers: Vec<String>,
    pub endpoint_check_result: String,
    pub endpoint_check_time: String,
    pub service_type: String,
    pub network_device_profile_name: String,
    pub radius_flow_type: String,
    pub ssid: String,
    pub anc_policy: String,
    pub mdm_registered: bool,
    pub mdm_compliant: bool,
    pub virtual_network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    ActiveDirectory,
    Identity,
    External,
    InterestingActiveDirectory,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
}

/// Payload of the session topics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTopicMessage {
    pub sequence: i64,
    pub sessions: Vec<Session>,
}

/// Payload of the group topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupTopicMessage {
    pub user_groups: Vec<Group>,
}

pub struct SessionDirectory {
    svc: Arc<ServiceDispatcher>,
    registry: Arc<PubSubRegistry>,
}

impl Capability for SessionDirectory {
    const NAME: &'static str = SERVICE_NAME;

    fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.svc
    }
}

impl SessionDirectory {
    pub fn new(svc: Arc<ServiceDispatcher>, registry: Arc<PubSubRegistry>) -> Self {
        Self { svc, registry }
    }

    /// Sessions changed since `start_timestamp` (all when empty),
    /// optionally narrowed by a server-side `filter`.
    pub fn get_sessions(&self, start_timestamp: &str, filter: Option<Value>) -> Call<Vec<Session>> {
        let mut payload = sparse(&[("startTimestamp", start_timestamp)]);
        if let Some(filter) = filter {
            payload["filter"] = filter;
        }
        list_call(&self.svc, "getSessions", payload, "sessions")
    }

    pub fn get_sessions_for_recovery(
        &self,
        start_timestamp: &str,
        end_timestamp: &str,
    ) -> Call<Vec<Session>> {
        let payload = sparse(&[
            ("startTimestamp", start_timestamp),
            ("endTimestamp", end_timestamp),
        ]);
        list_call(&self.svc, "getSessionsForRecovery", payload, "sessions")
    }

    pub fn get_session_by_ip_address(&self, ip_address: &str) -> Call<Option<Session>> {
        if let Err(e) = require(&[("ipAddress", ip_address)]) {
            return Call::failed(e);
        }
        Call::optional(
            Arc::clone(&self.svc),
            "getSessionByIpAddress",
            json!({ "ipAddress": ip_address }),
        )
    }

    pub fn get_session_by_mac_address(&self, mac_address: &str) -> Call<Option<Session>> {
        if let Err(e) = require(&[("macAddress", mac_address)]) {
            return Call::failed(e);
        }
        Call::optional(
            Arc::clone(&self.svc),
            "getSessionByMacAddress",
            json!({ "macAddress": mac_address }),
        )
    }

    pub fn get_user_groups(&self, filter: Option<Value>) -> Call<Vec<Group>> {
        let mut payload = json!({});
        if let Some(filter) = filter {
            payload["filter"] = filter;
        }
        list_call(&self.svc, "getUserGroups", payload, "userGroups")
    }

    /// Groups of `user_name`; a 204 means the user has none.
    pub fn get_user_group_by_user_name(&self, user_name: &str) -> Call<Vec<Group>> {
        if user_name.is_empty() {
            return Call::failed(Error::InvalidInput("userName must not be empty".into()));
        }
        list_call(
            &self.svc,
            "getUserGroupByUserName",
            json!({ "userName": user_name }),
            "groups",
        )
    }

    pub fn on_session_topic(&self) -> Subscriber<SessionTopicMessage> {
        self.subscriber(PROP_SESSION_TOPIC)
    }

    pub fn on_session_topic_all(&self) -> Subscriber<SessionTopicMessage> {
        self.subscriber(PROP_SESSION_TOPIC_ALL)
    }

    pub fn on_group_topic(&self) -> Subscriber<GroupTopicMessage> {
        self.subscriber(PROP_GROUP_TOPIC)
    }

    fn subscriber<T>(&self, topic_property: &str) -> Subscriber<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        Subscriber::new(Arc::clone(&self.svc), Arc::clone(&self.registry), topic_property)
    }
}
