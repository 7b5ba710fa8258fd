use serde::Serialize;

/// Structured trace events emitted across all pxGrid crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RestCall {
        url: String,
        status: u16,
        duration_ms: u64,
    },
    ServiceLookup {
        service: String,
        nodes: usize,
    },
    SecretProvisioned {
        service: String,
        node: String,
    },
    PubSubConnected {
        ws_url: String,
        reused: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "px_event");
    }
}
