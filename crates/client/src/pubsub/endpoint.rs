use std::sync::Arc;
use std::time::Duration;

use px_domain::config::PubSubConfig;
use px_domain::trace::TraceEvent;
use px_domain::{Error, Result};
use px_stomp::{ConnectOptions, StompClient};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::bridge::{self, BridgeHandle};
use super::dialer::Dialer;

/// How long a graceful disconnect waits for the node to close its side.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

struct LiveConnection {
    stomp: Arc<StompClient>,
    bridge: BridgeHandle,
}

impl LiveConnection {
    fn is_closed(&self) -> bool {
        self.bridge.is_closed() || self.stomp.is_closed()
    }
}

/// One shared STOMP session per WebSocket URL.
pub(crate) struct PubSubEndpoint {
    ws_url: String,
    dialer: Arc<Dialer>,
    settings: PubSubConfig,
    live: Mutex<Option<LiveConnection>>,
}

impl PubSubEndpoint {
    pub(crate) fn new(ws_url: impl Into<String>, dialer: Arc<Dialer>, settings: PubSubConfig) -> Self {
        Self {
            ws_url: ws_url.into(),
            dialer,
            settings,
            live: Mutex::new(None),
        }
    }

    /// Reuse the current session if it answers a ping, otherwise dial a
    /// new one. The lock is held across the probe and the redial.
    pub(crate) async fn connect(
        &self,
        username: &str,
        secret: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<StompClient>> {
        let mut live = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.live.lock() => guard,
        };

        if let Some(conn) = live.as_ref() {
            if !conn.is_closed() && conn.bridge.probe(self.settings.probe_timeout()).await {
                TraceEvent::PubSubConnected {
                    ws_url: self.ws_url.clone(),
                    reused: true,
                }
                .emit();
                return Ok(Arc::clone(&conn.stomp));
            }
            tracing::warn!(ws_url = %self.ws_url, "pub/sub connection is half-open, reconnecting");
            *live = None;
        }

        let ws = self.dialer.dial(&self.ws_url, username, secret, cancel).await?;
        let (io, bridge) = bridge::spawn(ws, &self.settings);

        let mut opts = ConnectOptions::new(stomp_host(&self.ws_url));
        opts.handshake_timeout = self.settings.handshake_timeout();
        tracing::debug!(ws_url = %self.ws_url, "STOMP connect");
        let stomp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = StompClient::connect(io, opts) => r,
        };
        let stomp = match stomp {
            Ok(client) => Arc::new(client),
            Err(e) => {
                let closed = bridge.close().await;
                return Err(handshake_error(&self.ws_url, &e, closed.as_deref()));
            }
        };

        *live = Some(LiveConnection {
            stomp: Arc::clone(&stomp),
            bridge,
        });
        TraceEvent::PubSubConnected {
            ws_url: self.ws_url.clone(),
            reused: false,
        }
        .emit();
        Ok(stomp)
    }

    /// DISCONNECT and close the socket. Subscriptions on it end.
    pub(crate) async fn disconnect(&self) {
        let Some(conn) = self.live.lock().await.take() else {
            return;
        };
        if conn.stomp.disconnect().await.is_ok() {
            let _ = tokio::time::timeout(DISCONNECT_GRACE, conn.bridge.closed()).await;
        }
        tracing::debug!(ws_url = %self.ws_url, "pub/sub endpoint disconnected");
    }
}

/// A failed STOMP handshake, with the socket close failure appended when
/// tearing the bridge down failed too.
fn handshake_error(ws_url: &str, err: &dyn std::fmt::Display, close: Option<&str>) -> Error {
    match close {
        None => Error::Stomp(format!("{ws_url}: {err}")),
        Some(close) => Error::Stomp(format!("{ws_url}: {err}; closing websocket: {close}")),
    }
}

/// Value of the STOMP `host` header: the URL's host, or the URL itself if
/// it has none.
fn stomp_host(ws_url: &str) -> String {
    Url::parse(ws_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| ws_url.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stomp_host_is_url_host() {
        assert_eq!(stomp_host("wss://ise-psn-1.corp:8910/pxgrid/ise/pubsub"), "ise-psn-1.corp");
        assert_eq!(stomp_host("not a url"), "not a url");
    }

    #[test]
    fn handshake_error_carries_close_failure() {
        let url = "wss://ise-psn-1:8910/pxgrid/ise/pubsub";
        assert_eq!(
            handshake_error(url, &"no CONNECTED frame", None),
            Error::Stomp(format!("{url}: no CONNECTED frame"))
        );
        assert_eq!(
            handshake_error(url, &"no CONNECTED frame", Some("broken pipe")),
            Error::Stomp(format!("{url}: no CONNECTED frame; closing websocket: broken pipe"))
        );
    }
}
