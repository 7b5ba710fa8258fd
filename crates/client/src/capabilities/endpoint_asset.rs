//! `com.cisco.endpoint.asset`: IoT asset inventory changes (topic only).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Capability, OperationType};
use crate::pubsub::PubSubRegistry;
use crate::service::ServiceDispatcher;
use crate::subscription::Subscriber;

pub const SERVICE_NAME: &str = "com.cisco.endpoint.asset";

pub const PROP_ASSET_TOPIC: &str = "assetTopic";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Asset {
    pub asset_id: String,
    pub asset_name: String,
    pub asset_ip_address: String,
    pub asset_mac_address: String,
    pub asset_vendor: String,
    pub asset_product_id: String,
    pub asset_serial_number: String,
    pub asset_device_type: String,
    pub asset_sw_revision: String,
    pub asset_hw_revision: String,
    pub asset_protocol: String,
    pub asset_custom_attributes: Vec<KeyValue>,
    pub asset_connected_links: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTopicMessage {
    #[serde(rename = "opType")]
    pub op_type: OperationType,
    pub asset: Asset,
}

pub struct EndpointAsset {
    svc: Arc<ServiceDispatcher>,
    registry: Arc<PubSubRegistry>,
}

impl Capability for EndpointAsset {
    const NAME: &'static str = SERVICE_NAME;

    fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.svc
    }
}

impl EndpointAsset {
    pub fn new(svc: Arc<ServiceDispatcher>, registry: Arc<PubSubRegistry>) -> Self {
        Self { svc, registry }
    }

    pub fn on_asset_topic(&self) -> Subscriber<AssetTopicMessage> {
        Subscriber::new(Arc::clone(&self.svc), Arc::clone(&self.registry), PROP_ASSET_TOPIC)
    }
}
