use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use px_domain::{Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::resolve::Resolver;
use crate::tls::TlsContext;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens authenticated WebSockets to pub/sub nodes, routing the TCP
/// connection through [`Resolver`] like the REST transport does.
pub struct Dialer {
    resolver: Arc<Resolver>,
    tls: Arc<TlsContext>,
    timeout: Duration,
}

impl Dialer {
    pub fn new(resolver: Arc<Resolver>, tls: Arc<TlsContext>, timeout: Duration) -> Self {
        Self {
            resolver,
            tls,
            timeout,
        }
    }

    /// Dial `ws_url` with `Authorization: Basic base64(username:secret)`.
    pub async fn dial(
        &self,
        ws_url: &str,
        username: &str,
        secret: &str,
        cancel: &CancellationToken,
    ) -> Result<WsStream> {
        let url = Url::parse(ws_url).map_err(|e| Error::UrlParse(format!("{ws_url}: {e}")))?;
        let connector = match url.scheme() {
            "wss" => Connector::Rustls(Arc::new(self.tls.client_config()?)),
            "ws" => Connector::Plain,
            other => {
                return Err(Error::UrlParse(format!(
                    "{ws_url}: unsupported scheme {other}"
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| Error::UrlParse(format!("{ws_url}: missing host")))?;
        let port = match url.port_or_known_default() {
            Some(0) | None => return Err(Error::InvalidPort(ws_url.to_owned())),
            Some(p) => p,
        };

        let mut request = ws_url
            .into_client_request()
            .map_err(|e| Error::WebSocket(format!("{ws_url}: {e}")))?;
        let credentials = STANDARD.encode(format!("{username}:{secret}"));
        let auth = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| Error::WebSocket(format!("authorization header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        tracing::debug!(ws_url = %ws_url, "websocket dial");
        let connect = async {
            let ip = self.resolver.resolve(host).await?;
            let addr = SocketAddr::new(ip, port);
            let tcp = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::WebSocket(format!("connect {addr}: {e}")))?;
            let (ws, _response) =
                tokio_tungstenite::client_async_tls_with_config(request, tcp, None, Some(connector))
                    .await
                    .map_err(|e| Error::WebSocket(format!("{ws_url}: {e}")))?;
            Ok::<_, Error>(ws)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            r = tokio::time::timeout(self.timeout, connect) => match r {
                Ok(r) => r,
                Err(_) => Err(Error::Timeout(format!("websocket dial {ws_url}"))),
            },
        }
    }
}
