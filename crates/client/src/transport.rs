//! Authenticated JSON POSTs to resolved addresses.
//!
//! The host of every URL is resolved through [`Resolver`] to exactly one
//! address; the connection goes there while SNI and the `Host` header keep
//! the original hostname.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use px_domain::config::{PxGridConfig, DEFAULT_CONTROL_PORT};
use px_domain::trace::TraceEvent;
use px_domain::{Error, Result};
use reqwest::header::ACCEPT;
use rustls::RootCertStore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

use crate::resolve::Resolver;
use crate::tls::TlsContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of a POST that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body. A decode failure is an [`Error::Decode`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Decode(format!("status {}: {e}", self.status)))
    }
}

/// Per-request authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Auth {
    /// The consumer's configured credentials.
    #[default]
    Default,
    /// No `Authorization` header.
    None,
    Basic { username: String, password: String },
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Anything that can POST JSON for the controller and the dispatcher.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        payload: &Value,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Transport {
    resolver: Arc<Resolver>,
    tls: Arc<TlsContext>,
    username: String,
    password: Option<String>,
    timeout: Duration,
    allow_plaintext: bool,
    /// One pooled client per (hostname, resolved address). Requests that
    /// bring their own trust roots get a fresh client instead.
    clients: Mutex<HashMap<(String, SocketAddr), reqwest::Client>>,
}

impl Transport {
    pub fn new(cfg: &PxGridConfig) -> Result<Self> {
        Ok(Self {
            resolver: Arc::new(Resolver::new(&cfg.dns)?),
            tls: Arc::new(TlsContext::from_config(&cfg.tls)?),
            username: cfg.username().to_owned(),
            password: cfg.auth.password.clone(),
            timeout: Duration::from_millis(cfg.http.timeout_ms),
            allow_plaintext: cfg.http.allow_plaintext,
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn tls(&self) -> &Arc<TlsContext> {
        &self.tls
    }

    /// A per-call builder seeded with the configured credentials. Overrides
    /// on it never touch the transport.
    pub fn request(&self) -> Request<'_> {
        Request {
            transport: self,
            auth: self.default_auth(),
            roots: None,
        }
    }

    fn default_auth(&self) -> Option<(String, String)> {
        self.password
            .as_ref()
            .map(|p| (self.username.clone(), p.clone()))
    }

    /// Client that connects `host` to `addr`. Domain names are pinned to
    /// the address so SNI and `Host` keep the name.
    fn client(
        &self,
        host: &str,
        addr: SocketAddr,
        is_domain: bool,
        roots: Option<Arc<RootCertStore>>,
    ) -> Result<reqwest::Client> {
        let key = (host.to_owned(), addr);
        if roots.is_none() {
            if let Some(client) = self.clients.lock().get(&key) {
                return Ok(client.clone());
            }
        }

        let tls = match &roots {
            Some(roots) => self.tls.client_config_with_roots(Arc::clone(roots))?,
            None => self.tls.client_config()?,
        };
        let mut builder = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(self.timeout);
        if is_domain {
            builder = builder.resolve(host, addr);
        }
        let client = builder.build().map_err(from_reqwest)?;

        if roots.is_none() {
            self.clients.lock().insert(key, client.clone());
        }
        Ok(client)
    }
}

#[async_trait]
impl RestTransport for Transport {
    async fn post(
        &self,
        url: &str,
        payload: &Value,
        auth: Auth,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut req = self.request();
        match auth {
            Auth::Default => {}
            Auth::None => req = req.no_auth(),
            Auth::Basic { username, password } => req = req.username(username).password(password),
        }
        req.post(url, payload, cancel).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Request<'a> {
    transport: &'a Transport,
    auth: Option<(String, String)>,
    roots: Option<Arc<RootCertStore>>,
}

impl Request<'_> {
    /// Send no credentials at all.
    pub fn no_auth(mut self) -> Self {
        self.auth = None;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        let password = self.auth.take().map(|(_, p)| p).unwrap_or_default();
        self.auth = Some((username.into(), password));
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        let username = self.auth.take().map(|(u, _)| u).unwrap_or_default();
        self.auth = Some((username, password.into()));
        self
    }

    /// Trust only `roots` for this request.
    pub fn root_certs(mut self, roots: Arc<RootCertStore>) -> Self {
        self.roots = Some(roots);
        self
    }

    /// POST `payload` as JSON and decode the response body into `T`.
    pub async fn post_json<T: DeserializeOwned>(
        self,
        url: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<(Response, T)> {
        let resp = self.post(url, payload, cancel).await?;
        let result = resp.json()?;
        Ok((resp, result))
    }

    /// POST `payload` as JSON. Any HTTP status is a successful return; only
    /// failing to get a response is an error.
    pub async fn post(
        self,
        url: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let mut target =
            Url::parse(url).map_err(|e| Error::UrlParse(format!("{url}: {e}")))?;
        match target.scheme() {
            "https" => {}
            "http" if self.transport.allow_plaintext => {}
            other => {
                return Err(Error::UrlParse(format!("{url}: unsupported scheme {other:?}")));
            }
        }
        let host = match target.host() {
            Some(Host::Domain(d)) => d.to_owned(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(Error::UrlParse(format!("{url}: missing host"))),
        };
        let is_domain = matches!(target.host(), Some(Host::Domain(_)));

        let port = target_port(url, &target)?;
        target
            .set_port(Some(port))
            .map_err(|_| Error::InvalidPort(format!("{url}: cannot set port {port}")))?;

        let ip = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = self.transport.resolver.resolve(&host) => r?,
        };
        let addr = SocketAddr::new(ip, port);

        let client = self.transport.client(&host, addr, is_domain, self.roots)?;

        let mut rb = client
            .post(target)
            .header(ACCEPT, "application/json")
            .json(payload);
        if let Some((username, password)) = &self.auth {
            rb = rb.basic_auth(username, Some(password));
        }

        tracing::debug!(url = %url, addr = %addr, "POST");
        let start = Instant::now();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = rb.send() => r.map_err(from_reqwest)?,
        };
        let status = resp.status().as_u16();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = resp.bytes() => r.map_err(from_reqwest)?,
        };

        TraceEvent::RestCall {
            url: url.to_owned(),
            status,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(Response { status, body })
    }
}

/// Port to connect to: the URL's own when it names one (including the
/// scheme default, e.g. an explicit `:443`), the control port otherwise.
fn target_port(raw: &str, url: &Url) -> Result<u16> {
    match url.port() {
        Some(0) => Err(Error::InvalidPort(format!("{raw}: port 0"))),
        Some(p) => Ok(p),
        // `Url` hides a port equal to the scheme default.
        None if authority_has_port(raw) => url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidPort(format!("{raw}: no default port for scheme"))),
        None => Ok(DEFAULT_CONTROL_PORT),
    }
}

/// Whether the authority of `raw` spells out a non-empty port.
fn authority_has_port(raw: &str) -> bool {
    let rest = raw.split_once("://").map_or(raw, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let port = match host_port.rfind(']') {
        Some(i) => host_port[i + 1..].strip_prefix(':'),
        None => host_port.rsplit_once(':').map(|(_, p)| p),
    };
    port.is_some_and(|p| !p.is_empty())
}

/// Convert a reqwest error into the shared error type.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}
