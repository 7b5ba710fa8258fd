//! pxGrid consumer: control-plane discovery, per-node secrets, capability
//! REST calls with node failover, and topic subscriptions over
//! STOMP-on-WebSocket.
//!
//! Start from [`PxGridConsumer`]; everything else hangs off it.

pub mod call;
pub mod capabilities;
pub mod consumer;
pub mod controller;
pub mod picker;
pub mod pubsub;
pub mod resolve;
pub mod service;
pub mod subscription;
pub mod tls;
pub mod transport;

pub use call::{Call, FullResponse, NoResultCall, NoResultResponse};
pub use consumer::PxGridConsumer;
pub use controller::{AccountActivateResponse, AccountCreateResponse, AccountState, ControlPlane, Controller};
pub use picker::{NodePick, NodePicker};
pub use service::ServiceDispatcher;
pub use subscription::{Message, Subscriber, Subscription};
pub use transport::{Auth, Response, RestTransport, Transport};

pub use px_domain::{config, Error, ErrorKind, Result, ServiceNode};
