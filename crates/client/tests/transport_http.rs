//! The REST transport against a local HTTP server.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use px_grid::config::PxGridConfig;
use px_grid::{Error, Transport};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> Transport {
    let mut cfg = PxGridConfig::default();
    cfg.node_name = "px-consumer".into();
    cfg.auth.password = Some("pw".into());
    cfg.http.allow_plaintext = true;
    Transport::new(&cfg).unwrap()
}

fn basic(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

#[tokio::test]
async fn configured_credentials_are_sent_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pxgrid/control/AccountActivate"))
        .and(header("authorization", basic("px-consumer", "pw").as_str()))
        .and(header("accept", "application/json"))
        .and(body_json(json!({ "description": "watcher" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accountState": "ENABLED" })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/pxgrid/control/AccountActivate", server.uri());
    let (resp, body): (_, Value) = transport()
        .request()
        .post_json(&url, &json!({ "description": "watcher" }), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(body["accountState"], "ENABLED");
}

#[tokio::test]
async fn per_request_credentials_override_configured_ones() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", basic("px-consumer", "node-secret").as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let resp = transport()
        .request()
        .password("node-secret")
        .post(&format!("{}/getSessions", server.uri()), &json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.status, 204);
    assert!(resp.body.is_empty());
}

#[tokio::test]
async fn no_auth_sends_no_authorization_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    transport()
        .request()
        .no_auth()
        .post(&format!("{}/AccountCreate", server.uri()), &json!({}), &CancellationToken::new())
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn error_status_is_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let resp = transport()
        .request()
        .post(&format!("{}/x", server.uri()), &json!({}), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.status, 503);
    assert_eq!(&resp.body[..], b"busy");
    assert!(!resp.is_success());
}

#[tokio::test]
async fn undecodable_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = transport()
        .request()
        .post_json::<Value>(&format!("{}/x", server.uri()), &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn refused_connection_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = transport()
        .request()
        .post(&format!("http://127.0.0.1:{port}/x"), &json!({}), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_transport(), "{err:?}");
}
