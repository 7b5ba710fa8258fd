//! Deferred capability calls.
//!
//! A [`Call`] is built synchronously by a capability facade and executed
//! later in one of four modes. Input validation happens at build time: a
//! call built with [`Call::failed`] returns its error from every mode
//! without touching the network.

use std::sync::Arc;

use bytes::Bytes;
use px_domain::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::picker::NodePick;
use crate::service::ServiceDispatcher;
use crate::transport::Response;

/// Turns the winning response into the call's result. Owns status-code
/// interpretation.
pub type Mapper<R> = Box<dyn Fn(&Response) -> Result<R> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct FullResponse<R> {
    pub status: u16,
    pub result: R,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoResultResponse {
    pub status: u16,
}

enum Target {
    Ready {
        svc: Arc<ServiceDispatcher>,
        name: String,
        payload: Value,
    },
    Failed(Error),
}

/// A pending call returning `R`.
pub struct Call<R> {
    target: Target,
    mapper: Mapper<R>,
}

impl<R> Call<R>
where
    R: DeserializeOwned + Default + 'static,
{
    /// Decode the body into `R` with [`simple_result`].
    pub fn new(svc: Arc<ServiceDispatcher>, name: impl Into<String>, payload: Value) -> Self {
        Self::with_mapper(svc, name, payload, simple_result::<R>)
    }
}

impl<R> Call<Option<R>>
where
    R: DeserializeOwned + 'static,
{
    /// Single-object lookups: 204 or an empty body is `None`, see
    /// [`optional_result`].
    pub fn optional(svc: Arc<ServiceDispatcher>, name: impl Into<String>, payload: Value) -> Self {
        Self::with_mapper(svc, name, payload, optional_result::<R>)
    }
}

impl<R> Call<R> {
    pub fn with_mapper(
        svc: Arc<ServiceDispatcher>,
        name: impl Into<String>,
        payload: Value,
        mapper: impl Fn(&Response) -> Result<R> + Send + Sync + 'static,
    ) -> Self {
        Self {
            target: Target::Ready {
                svc,
                name: name.into(),
                payload,
            },
            mapper: Box::new(mapper),
        }
    }

    /// A call that can only ever fail with `err`.
    pub fn failed(err: Error) -> Self {
        Self {
            target: Target::Failed(err.clone()),
            mapper: Box::new(move |_: &Response| Err(err.clone())),
        }
    }

    /// Run over all nodes in lookup order.
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<FullResponse<R>> {
        self.execute_with(&NodePick::Ordered, cancel).await
    }

    pub async fn execute_on_node(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<FullResponse<R>> {
        self.execute_with(&NodePick::index(index), cancel).await
    }

    /// Resolve `node_name` to its index first; an unknown name fails
    /// before any call is made.
    pub async fn execute_on_node_by_name(
        &self,
        node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<FullResponse<R>> {
        let svc = self.ready()?;
        svc.check_nodes(cancel).await?;
        let index = svc.find_node_index_by_name(node_name)?;
        self.execute_on_node(index, cancel).await
    }

    pub async fn execute_on_nodes(
        &self,
        indices: &[usize],
        cancel: &CancellationToken,
    ) -> Result<FullResponse<R>> {
        self.execute_with(&NodePick::Index(indices.to_vec()), cancel).await
    }

    /// Run with an arbitrary node selection policy.
    pub async fn execute_with(
        &self,
        pick: &NodePick,
        cancel: &CancellationToken,
    ) -> Result<FullResponse<R>> {
        let (svc, name, payload) = match &self.target {
            Target::Ready { svc, name, payload } => (svc, name, payload),
            Target::Failed(e) => return Err(e.clone()),
        };
        let resp = svc.call(name, payload, pick, cancel).await?;
        let result = (self.mapper)(&resp)?;
        Ok(FullResponse {
            status: resp.status,
            result,
            body: resp.body,
        })
    }

    fn ready(&self) -> Result<&Arc<ServiceDispatcher>> {
        match &self.target {
            Target::Ready { svc, .. } => Ok(svc),
            Target::Failed(e) => Err(e.clone()),
        }
    }
}

/// A pending call whose body is ignored.
pub struct NoResultCall(Call<()>);

impl NoResultCall {
    /// Fails on any status above 299.
    pub fn new(svc: Arc<ServiceDispatcher>, name: impl Into<String>, payload: Value) -> Self {
        Self(Call::with_mapper(svc, name, payload, simple_no_result))
    }

    pub fn with_mapper(
        svc: Arc<ServiceDispatcher>,
        name: impl Into<String>,
        payload: Value,
        mapper: impl Fn(&Response) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self(Call::with_mapper(svc, name, payload, mapper))
    }

    pub fn failed(err: Error) -> Self {
        Self(Call::failed(err))
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> Result<NoResultResponse> {
        self.0.execute(cancel).await.map(status_only)
    }

    pub async fn execute_on_node(
        &self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<NoResultResponse> {
        self.0.execute_on_node(index, cancel).await.map(status_only)
    }

    pub async fn execute_on_node_by_name(
        &self,
        node_name: &str,
        cancel: &CancellationToken,
    ) -> Result<NoResultResponse> {
        self.0
            .execute_on_node_by_name(node_name, cancel)
            .await
            .map(status_only)
    }

    pub async fn execute_on_nodes(
        &self,
        indices: &[usize],
        cancel: &CancellationToken,
    ) -> Result<NoResultResponse> {
        self.0.execute_on_nodes(indices, cancel).await.map(status_only)
    }

    pub async fn execute_with(
        &self,
        pick: &NodePick,
        cancel: &CancellationToken,
    ) -> Result<NoResultResponse> {
        self.0.execute_with(pick, cancel).await.map(status_only)
    }
}

fn status_only(full: FullResponse<()>) -> NoResultResponse {
    NoResultResponse {
        status: full.status,
    }
}

// ── mappers ─────────────────────────────────────────────────────────

/// Statuses above 299 are errors; 204 or an empty body yield
/// `R::default()`; anything else is decoded.
pub fn simple_result<R: DeserializeOwned + Default>(resp: &Response) -> Result<R> {
    if resp.status > 299 {
        return Err(Error::UnexpectedStatus(resp.status));
    }
    if resp.status == 204 || resp.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(R::default());
    }
    resp.json()
}

pub fn simple_no_result(resp: &Response) -> Result<()> {
    if resp.status > 299 {
        return Err(Error::UnexpectedStatus(resp.status));
    }
    Ok(())
}

/// Like [`simple_result`] but 204 means "nothing there" rather than an
/// empty value.
pub fn optional_result<R: DeserializeOwned>(resp: &Response) -> Result<Option<R>> {
    if resp.status > 299 {
        return Err(Error::UnexpectedStatus(resp.status));
    }
    if resp.status == 204 || resp.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    resp.json().map(Some)
}
