mod common;

use std::sync::Arc;

use common::{node, FakeControl, CONSUMER};
use px_grid::capabilities::SessionDirectory;
use px_grid::config::{DnsConfig, PubSubConfig, TlsConfig};
use px_grid::pubsub::{Dialer, PubSubRegistry};
use px_grid::resolve::Resolver;
use px_grid::tls::TlsContext;
use px_grid::{Auth, Call, Error, NodePick, Response, ServiceDispatcher};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn dispatcher(control: &Arc<FakeControl>) -> Arc<ServiceDispatcher> {
    Arc::new(ServiceDispatcher::new("com.cisco.ise.session", control.clone()))
}

fn session_directory(control: &Arc<FakeControl>) -> SessionDirectory {
    let dialer = Arc::new(Dialer::new(
        Arc::new(Resolver::new(&DnsConfig::default()).unwrap()),
        Arc::new(TlsContext::from_config(&TlsConfig::default()).unwrap()),
        PubSubConfig::default().handshake_timeout(),
    ));
    let registry = Arc::new(PubSubRegistry::new(control.clone(), dialer, PubSubConfig::default()));
    SessionDirectory::new(dispatcher(control), registry)
}

#[tokio::test]
async fn node_without_rest_base_url_is_skipped() {
    let control = Arc::new(FakeControl::answering(
        vec![
            node("psn-1", json!({})),
            node("psn-2", json!({ "sessionTopic": "/topic/com.cisco.ise.session" })),
            node("psn-3", json!({ "restBaseUrl": "https://psn-3:8910/pxgrid/ise/session" })),
        ],
        |_| Ok(Response::new(200, r#"{"sessions":[]}"#)),
    ));
    let sessions = session_directory(&control)
        .get_sessions("", None)
        .execute(&CancellationToken::new())
        .await
        .unwrap();
    assert!(sessions.result.is_empty());

    // No secret for the nodes that cannot be called.
    assert_eq!(control.secrets(), 1);
    let calls = control.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://psn-3:8910/pxgrid/ise/session/getSessions");
    assert_eq!(calls[0].1, Auth::basic(CONSUMER, "secret-psn-3"));
}

#[tokio::test]
async fn no_callable_node_is_all_nodes_failed() {
    let control = Arc::new(FakeControl::new(vec![
        node("psn-1", json!({})),
        node("psn-2", json!({ "restBaseUrl": 42 })),
        node("psn-3", json!({ "sessionTopic": "/topic/com.cisco.ise.session" })),
    ]));
    let err = session_directory(&control)
        .get_sessions("", None)
        .execute(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, Error::AllNodesFailed("getSessions".into()));
    assert_eq!(control.secrets(), 0);
    assert!(control.call_urls().is_empty());
}

#[tokio::test]
async fn concurrent_checks_share_one_lookup() {
    let control = Arc::new(FakeControl::new(vec![node("psn-1", json!({}))]));
    let svc = dispatcher(&control);
    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(svc.check_nodes(&cancel), svc.check_nodes(&cancel));
    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap().len(), 1);
    assert_eq!(control.lookups(), 1);

    svc.check_nodes(&cancel).await.unwrap();
    assert_eq!(control.lookups(), 1);
}

#[tokio::test]
async fn empty_lookup_is_service_unavailable() {
    let control = Arc::new(FakeControl::new(Vec::new()));
    let err = dispatcher(&control)
        .check_nodes(&CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, Error::ServiceUnavailable("com.cisco.ise.session".into()));
}

#[tokio::test]
async fn failed_call_never_touches_the_network() {
    let control = Arc::new(FakeControl::new(vec![node(
        "psn-1",
        json!({ "restBaseUrl": "https://psn-1/x" }),
    )]));
    let cancel = CancellationToken::new();
    let expected = Error::InvalidInput("macAddress must not be empty".into());

    let call = session_directory(&control).get_session_by_mac_address("");
    assert_eq!(call.execute(&cancel).await.unwrap_err(), expected);
    assert_eq!(call.execute_on_node(0, &cancel).await.unwrap_err(), expected);
    assert_eq!(call.execute_on_node_by_name("psn-1", &cancel).await.unwrap_err(), expected);
    assert_eq!(call.execute_on_nodes(&[0], &cancel).await.unwrap_err(), expected);

    assert_eq!(control.lookups(), 0);
    assert!(control.call_urls().is_empty());
}

#[tokio::test]
async fn property_comes_from_first_node_carrying_it() {
    let control = Arc::new(FakeControl::new(vec![
        node("psn-1", json!({})),
        node("psn-2", json!({ "sessionTopic": "/topic/com.cisco.ise.session" })),
    ]));
    let topic = dispatcher(&control)
        .find_property_str("sessionTopic", &NodePick::Ordered, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(topic, "/topic/com.cisco.ise.session");
}

#[tokio::test]
async fn unknown_node_name_fails_before_calling() {
    let control = Arc::new(FakeControl::new(vec![node(
        "psn-1",
        json!({ "restBaseUrl": "https://psn-1/x" }),
    )]));
    let call: Call<Value> = Call::new(dispatcher(&control), "getSessions", json!({}));
    let err = call
        .execute_on_node_by_name("psn-9", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, Error::NodeNotFound("psn-9".into()));
    assert_eq!(control.lookups(), 1);
    assert!(control.call_urls().is_empty());
}

#[tokio::test]
async fn transport_error_moves_to_next_node() {
    let control = Arc::new(FakeControl::answering(
        vec![
            node("psn-1", json!({ "restBaseUrl": "https://psn-1/x" })),
            node("psn-2", json!({ "restBaseUrl": "https://psn-2/x/" })),
        ],
        |url| {
            if url.contains("psn-1") {
                Err(Error::Http("connection refused".into()))
            } else {
                Ok(Response::new(200, r#"{"ok":true}"#))
            }
        },
    ));
    let call: Call<Value> = Call::new(dispatcher(&control), "getSessions", json!({}));
    let resp = call.execute(&CancellationToken::new()).await.unwrap();
    assert_eq!(resp.result, json!({ "ok": true }));
    assert_eq!(
        control.call_urls(),
        vec!["https://psn-1/x/getSessions", "https://psn-2/x/getSessions"]
    );
}

#[tokio::test]
async fn first_answer_wins_even_when_it_is_an_error_status() {
    let control = Arc::new(FakeControl::answering(
        vec![
            node("psn-1", json!({ "restBaseUrl": "https://psn-1/x" })),
            node("psn-2", json!({ "restBaseUrl": "https://psn-2/x" })),
        ],
        |_| Ok(Response::new(500, "")),
    ));
    let call: Call<Value> = Call::new(dispatcher(&control), "getSessions", json!({}));
    let err = call.execute(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err, Error::UnexpectedStatus(500));
    assert_eq!(control.call_urls().len(), 1);
}

#[tokio::test]
async fn secrets_are_cached_per_node() {
    let control = Arc::new(FakeControl::new(vec![node(
        "psn-1",
        json!({ "restBaseUrl": "https://psn-1/x" }),
    )]));
    let call: Call<Value> = Call::new(dispatcher(&control), "getSessions", json!({}));
    let cancel = CancellationToken::new();
    call.execute(&cancel).await.unwrap();
    call.execute(&cancel).await.unwrap();
    assert_eq!(control.secrets(), 1);
    assert_eq!(control.call_urls().len(), 2);
}

#[tokio::test]
async fn relookup_drops_provisioned_secrets() {
    let control = Arc::new(FakeControl::new(vec![node("psn-1", json!({}))]));
    let svc = dispatcher(&control);
    let cancel = CancellationToken::new();
    svc.update_secrets(&cancel).await.unwrap();
    assert_eq!(svc.nodes()[0].secret, "secret-psn-1");

    svc.lookup(&cancel).await.unwrap();
    assert!(svc.nodes()[0].secret.is_empty());
}

#[tokio::test]
async fn missing_property_is_property_not_found() {
    let control = Arc::new(FakeControl::new(vec![
        node("psn-1", json!({})),
        node("psn-2", json!({ "sessionTopic": 7 })),
    ]));
    let svc = dispatcher(&control);
    let cancel = CancellationToken::new();

    let err = svc
        .find_property("groupTopic", &NodePick::Ordered, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, Error::PropertyNotFound("groupTopic".into()));

    let err = svc
        .find_property_str("sessionTopic", &NodePick::Ordered, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, Error::PropertyNotString("sessionTopic".into()));
}

#[tokio::test]
async fn transport_error_on_last_node_is_returned_as_is() {
    let control = Arc::new(FakeControl::answering(
        vec![
            node("psn-1", json!({ "restBaseUrl": "https://psn-1/x" })),
            node("psn-2", json!({ "restBaseUrl": "https://psn-2/x" })),
        ],
        |url| Err(Error::Http(format!("connection refused: {url}"))),
    ));
    let call: Call<Value> = Call::new(dispatcher(&control), "getSessions", json!({}));
    let err = call.execute(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(
        err,
        Error::Http("connection refused: https://psn-2/x/getSessions".into())
    );
    assert_eq!(control.call_urls().len(), 2);
}

#[tokio::test]
async fn secret_fetched_across_a_relookup_is_not_cached() {
    let psn1 = || node("psn-1", json!({ "restBaseUrl": "https://psn-1/x" }));
    let control = Arc::new(FakeControl::new(vec![psn1()]).with_secret_gate());
    let svc = dispatcher(&control);
    let cancel = CancellationToken::new();
    svc.check_nodes(&cancel).await.unwrap();

    let task = {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.call("getSessions", &json!({}), &NodePick::Ordered, &CancellationToken::new())
                .await
        })
    };
    control.gate().entered.notified().await;

    // Same node at the same index, but from a newer lookup.
    control.set_nodes(vec![psn1(), node("psn-2", json!({ "restBaseUrl": "https://psn-2/x" }))]);
    svc.lookup(&cancel).await.unwrap();
    control.gate().release.notify_one();

    let resp = task.await.unwrap().unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(
        control.calls.lock()[0],
        ("https://psn-1/x/getSessions".to_owned(), Auth::basic(CONSUMER, "secret-psn-1"))
    );
    assert!(svc.nodes().iter().all(|n| !n.has_secret()));
}

#[tokio::test]
async fn cancelled_dispatch_makes_no_call() {
    let control = Arc::new(FakeControl::new(vec![node(
        "psn-1",
        json!({ "restBaseUrl": "https://psn-1/x" }),
    )]));
    let svc = dispatcher(&control);
    svc.update_secrets(&CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = svc
        .call("getSessions", &json!({}), &NodePick::Ordered, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, Error::Cancelled);
    assert!(control.call_urls().is_empty());
}

#[tokio::test]
async fn cancel_during_secret_exchange_stops_dispatch() {
    let control = Arc::new(
        FakeControl::new(vec![
            node("psn-1", json!({ "restBaseUrl": "https://psn-1/x" })),
            node("psn-2", json!({ "restBaseUrl": "https://psn-2/x" })),
        ])
        .with_secret_gate(),
    );
    let svc = dispatcher(&control);
    let cancel = CancellationToken::new();

    let task = {
        let (svc, cancel) = (svc.clone(), cancel.clone());
        tokio::spawn(async move {
            svc.call("getSessions", &json!({}), &NodePick::Ordered, &cancel)
                .await
        })
    };
    control.gate().entered.notified().await;
    cancel.cancel();

    assert_eq!(task.await.unwrap().unwrap_err(), Error::Cancelled);
    assert_eq!(control.secrets(), 1);
    assert!(control.call_urls().is_empty());
    assert!(svc.nodes().iter().all(|n| !n.has_secret()));
}

#[tokio::test]
async fn no_content_lookup_is_none() {
    let control = Arc::new(FakeControl::answering(
        vec![node("psn-1", json!({ "restBaseUrl": "https://psn-1/x" }))],
        |_| Ok(Response::new(204, "")),
    ));
    let resp = session_directory(&control)
        .get_session_by_mac_address("00:11:22:33:44:55")
        .execute(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.status, 204);
    assert!(resp.result.is_none());
}
