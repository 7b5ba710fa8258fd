//! Typed facades over [`ServiceDispatcher`] for individual capabilities.
//!
//! Each facade owns a handle to its capability's dispatcher and builds
//! [`Call`]s and [`Subscriber`]s; none of them do any I/O of their own.

pub mod anc_config;
pub mod endpoint_asset;
pub mod session_directory;
pub mod system_health;
pub mod trustsec_config;

pub use anc_config::AncConfig;
pub use endpoint_asset::EndpointAsset;
pub use session_directory::SessionDirectory;
pub use system_health::SystemHealth;
pub use trustsec_config::TrustSecConfig;

use std::sync::Arc;

use async_trait::async_trait;
use px_domain::node::{PROP_REST_BASE_URL, PROP_WS_PUBSUB_SERVICE};
use px_domain::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::call::Call;
use crate::picker::NodePick;
use crate::service::ServiceDispatcher;
use crate::transport::Response;

/// Kind of change carried by a topic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

/// Shared surface of every capability facade.
#[async_trait]
pub trait Capability: Send + Sync {
    /// The capability's service name, e.g. `com.cisco.ise.session`.
    const NAME: &'static str;

    fn dispatcher(&self) -> &Arc<ServiceDispatcher>;

    fn name(&self) -> &str {
        self.dispatcher().name()
    }

    async fn lookup(&self, cancel: &CancellationToken) -> Result<()> {
        self.dispatcher().lookup(cancel).await.map(|_| ())
    }

    async fn update_secrets(&self, cancel: &CancellationToken) -> Result<()> {
        self.dispatcher().update_secrets(cancel).await
    }

    /// String property from the first node advertising it.
    async fn property(&self, key: &str, cancel: &CancellationToken) -> Result<String> {
        self.dispatcher()
            .find_property_str(key, &NodePick::Ordered, cancel)
            .await
    }

    async fn rest_base_url(&self, cancel: &CancellationToken) -> Result<String> {
        self.property(PROP_REST_BASE_URL, cancel).await
    }

    async fn ws_pubsub_service(&self, cancel: &CancellationToken) -> Result<String> {
        self.property(PROP_WS_PUBSUB_SERVICE, cancel).await
    }
}

/// A call whose result is the array under `field` of the response object.
/// 204 or an empty body yields an empty list.
pub(crate) fn list_call<T>(
    svc: &Arc<ServiceDispatcher>,
    name: &str,
    payload: Value,
    field: &'static str,
) -> Call<Vec<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    Call::with_mapper(Arc::clone(svc), name, payload, move |resp: &Response| {
        if resp.status > 299 {
            return Err(Error::UnexpectedStatus(resp.status));
        }
        if resp.status == 204 || resp.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let mut wrapper: serde_json::Map<String, Value> = resp.json()?;
        match wrapper.remove(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(list) => serde_json::from_value(list).map_err(Error::from),
        }
    })
}

/// Reject empty required inputs at construction time.
pub(crate) fn require(fields: &[(&str, &str)]) -> Result<()> {
    match fields.iter().find(|(_, v)| v.is_empty()) {
        Some((name, _)) => Err(Error::InvalidInput(format!("{name} must not be empty"))),
        None => Ok(()),
    }
}

/// JSON object holding only the non-empty string fields.
pub(crate) fn sparse(fields: &[(&str, &str)]) -> Value {
    let map = fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| ((*k).to_owned(), Value::String((*v).to_owned())))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}
