//! `com.cisco.ise.system`: per-node health and RADIUS performance samples.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{list_call, sparse, Capability};
use crate::call::Call;
use crate::service::ServiceDispatcher;

pub const SERVICE_NAME: &str = "com.cisco.ise.system";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Health {
    pub timestamp: String,
    pub server_name: String,
    pub io_wait: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage_root: f64,
    pub disk_usage_opt: f64,
    pub load_average: f64,
    pub network_sent: f64,
    pub network_received: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Performance {
    pub timestamp: String,
    pub server_name: String,
    pub radius_rate: f64,
    pub radius_count: f64,
    pub radius_latency: f64,
}

pub struct SystemHealth {
    svc: Arc<ServiceDispatcher>,
}

impl Capability for SystemHealth {
    const NAME: &'static str = SERVICE_NAME;

    fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.svc
    }
}

impl SystemHealth {
    pub fn new(svc: Arc<ServiceDispatcher>) -> Self {
        Self { svc }
    }

    /// Health samples for `node_name` (all nodes when empty) since
    /// `start_timestamp` (server default when empty).
    pub fn get_healths(&self, node_name: &str, start_timestamp: &str) -> Call<Vec<Health>> {
        let payload = sparse(&[("nodeName", node_name), ("startTimestamp", start_timestamp)]);
        list_call(&self.svc, "getHealths", payload, "healths")
    }

    pub fn get_performances(&self, node_name: &str, start_timestamp: &str) -> Call<Vec<Performance>> {
        let payload = sparse(&[("nodeName", node_name), ("startTimestamp", start_timestamp)]);
        list_call(&self.svc, "getPerformances", payload, "performances")
    }
}
