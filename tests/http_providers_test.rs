//! Edge and REST key-value providers against mock HTTP servers

mod common;

use courier_core::cache::{
    DualProviderStore, EdgeKvStore, KvStore, ProviderSlot, RestKvStore, StoreError,
};
use courier_core::config::{EdgeKvConfig, RestKvConfig, StoreConfig};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAMESPACE: &str = "/accounts/acc-1/storage/kv/namespaces/ns-1";

fn edge_config(server: &MockServer) -> EdgeKvConfig {
    EdgeKvConfig {
        base_url: format!("{}{NAMESPACE}", server.uri()),
        api_token: "edge-token".to_string(),
        timeout_ms: 1_000,
    }
}

fn rest_config(server: &MockServer) -> RestKvConfig {
    RestKvConfig {
        url: server.uri(),
        token: "rest-token".to_string(),
        timeout_ms: 1_000,
    }
}

#[tokio::test]
async fn edge_get_hit_and_miss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/values/greeting")))
        .and(header("authorization", "Bearer edge-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\"hello\""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/values/missing")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = EdgeKvStore::from_config(&edge_config(&server)).unwrap();
    assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("\"hello\""));
    assert_eq!(store.get("missing").await.unwrap(), None);
}

#[tokio::test]
async fn edge_put_raises_short_ttls_to_the_provider_minimum() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(format!("{NAMESPACE}/values/lock:task:1")))
        .and(query_param("expiration_ttl", "60"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let store = EdgeKvStore::from_config(&edge_config(&server)).unwrap();
    store
        .set("lock:task:1", "owner", Some(Duration::from_secs(10)))
        .await
        .unwrap();
}

#[tokio::test]
async fn edge_failures_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/values/throttled")))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{NAMESPACE}/values/over")))
        .respond_with(
            ResponseTemplate::new(403).set_body_string("KV put() limit exceeded for the day"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/values/down")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/values/bad")))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let store = EdgeKvStore::from_config(&edge_config(&server)).unwrap();
    assert!(matches!(
        store.get("throttled").await,
        Err(StoreError::QuotaExceeded(_))
    ));
    assert!(matches!(
        store.set("over", "v", None).await,
        Err(StoreError::QuotaExceeded(_))
    ));
    assert!(matches!(store.get("down").await, Err(StoreError::Connection(_))));
    assert!(matches!(
        store.get("bad").await,
        Err(StoreError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn edge_key_listing_follows_cursors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/keys")))
        .and(query_param("cursor", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"name": "instance:c"}],
            "result_info": {"cursor": ""}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{NAMESPACE}/keys")))
        .and(query_param("prefix", "instance:"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"name": "instance:a"}, {"name": "instance:b"}],
            "result_info": {"cursor": "page-2"}
        })))
        .mount(&server)
        .await;

    let store = EdgeKvStore::from_config(&edge_config(&server)).unwrap();
    assert_eq!(
        store.keys("instance:").await.unwrap(),
        vec!["instance:a", "instance:b", "instance:c"]
    );
}

#[tokio::test]
async fn rest_commands_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer rest-token"))
        .and(body_json(json!(["GET", "setting:theme"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "\"dark\""})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!(["GET", "absent"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SET", "k", "v", "EX", "30"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let store = RestKvStore::from_config(&rest_config(&server)).unwrap();
    assert_eq!(
        store.get("setting:theme").await.unwrap().as_deref(),
        Some("\"dark\"")
    );
    assert_eq!(store.get("absent").await.unwrap(), None);
    store.set("k", "v", Some(Duration::from_secs(30))).await.unwrap();
}

#[tokio::test]
async fn rest_put_if_absent_is_atomic_set_nx() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SET", "lock:generic:a", "me", "NX", "EX", "30"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SET", "lock:generic:b", "me", "NX", "EX", "30"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": null})))
        .mount(&server)
        .await;

    let store = RestKvStore::from_config(&rest_config(&server)).unwrap();
    let ttl = Duration::from_secs(30);
    assert!(store.put_if_absent("lock:generic:a", "me", ttl).await.unwrap());
    assert!(!store.put_if_absent("lock:generic:b", "me", ttl).await.unwrap());
}

#[tokio::test]
async fn rest_error_replies_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!(["GET", "a"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "ERR max daily request limit exceeded"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!(["GET", "b"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "WRONGTYPE Operation against a key holding the wrong kind of value"
        })))
        .mount(&server)
        .await;

    let store = RestKvStore::from_config(&rest_config(&server)).unwrap();
    assert!(matches!(store.get("a").await, Err(StoreError::QuotaExceeded(_))));
    assert!(matches!(store.get("b").await, Err(StoreError::Backend(_))));
}

#[tokio::test]
async fn rest_scan_walks_every_page() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SCAN", "0", "MATCH", "lock:*", "COUNT", "100"])))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": ["17", ["lock:a", "lock:b"]]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SCAN", "17", "MATCH", "lock:*", "COUNT", "100"])))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": ["0", ["lock:c"]]})),
        )
        .mount(&server)
        .await;

    let store = RestKvStore::from_config(&rest_config(&server)).unwrap();
    assert_eq!(
        store.keys("lock:").await.unwrap(),
        vec!["lock:a", "lock:b", "lock:c"]
    );
}

#[tokio::test]
async fn rest_scan_matches_glob_characters_literally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!([
            "SCAN",
            "0",
            "MATCH",
            r"setting:feature\*flag\?*",
            "COUNT",
            "100"
        ])))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": ["0", ["setting:feature*flag?on"]]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = RestKvStore::from_config(&rest_config(&server)).unwrap();
    assert_eq!(
        store.keys("setting:feature*flag?").await.unwrap(),
        vec!["setting:feature*flag?on"]
    );
}

#[tokio::test]
async fn edge_quota_exhaustion_fails_over_to_rest() {
    let edge = MockServer::start().await;
    let rest = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&edge)
        .await;
    Mock::given(method("POST"))
        .and(body_json(json!(["SET", "setting:k", "1"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "OK"})))
        .expect(1)
        .mount(&rest)
        .await;

    let config = StoreConfig {
        edge: Some(edge_config(&edge)),
        rest: Some(rest_config(&rest)),
        ..Default::default()
    };
    let store = DualProviderStore::from_config(&config).unwrap().unwrap();

    assert!(store.set("setting:k", "1", None).await.is_err());
    assert!(store.set("setting:k", "1", None).await.is_err());
    store.set("setting:k", "1", None).await.unwrap();
    assert_eq!(store.current_provider(), ProviderSlot::Secondary);
}
