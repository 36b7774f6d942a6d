mod common;

use std::sync::Arc;

use common::{url, Harness, Reply};
use offsync_core::{
    Connectivity, Error, HttpTransport, Interceptor, InterceptorConfig, Method, Request,
    ResponseSource,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn todos() -> InterceptorConfig {
    InterceptorConfig::for_collection("todos")
}

// ===== Offline reads =====

#[tokio::test]
async fn offline_get_answers_from_cache() {
    let h = Harness::new(false).await;
    h.store.put_items("todos", &[json!({"id": 1, "title": "a"})]).await.unwrap();

    let response = h.interceptor.send(Request::get(url("/todos")), Some(&todos())).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.body, Some(json!([{"id": 1, "title": "a"}])));
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn offline_get_with_empty_cache_is_unavailable() {
    let h = Harness::new(false).await;

    let err = h.interceptor.send(Request::get(url("/todos")), Some(&todos())).await.unwrap_err();

    assert!(matches!(err, Error::OfflineUnavailable { ref collection, .. } if collection == "todos"));
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn offline_get_by_id_reads_single_item() {
    let h = Harness::new(false).await;
    h.store.put_items("todos", &[json!({"id": 1}), json!({"id": 2, "title": "b"})]).await.unwrap();

    let response = h.interceptor.send(Request::get(url("/todos/2")), Some(&todos())).await.unwrap();
    assert_eq!(response.body, Some(json!({"id": 2, "title": "b"})));

    let missing = h.interceptor.send(Request::get(url("/todos/3")), Some(&todos())).await;
    assert!(matches!(missing, Err(Error::OfflineUnavailable { .. })));
}

// ===== Offline writes =====

#[tokio::test]
async fn offline_put_is_queued_and_applied_locally() {
    let h = Harness::new(false).await;
    h.store.put_items("todos", &[json!({"id": 1, "completed": false})]).await.unwrap();

    let response = h
        .interceptor
        .send(Request::put(url("/todos/1"), json!({"id": 1, "completed": true})), Some(&todos()))
        .await
        .unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(response.source, ResponseSource::Queued);
    assert_eq!(h.transport.call_count(), 0);

    let queue = h.store.list_mutations().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].method, Method::Put);
    assert_eq!(queue[0].collection_key, "todos");
    assert!(!queue[0].provisional);

    assert_eq!(
        h.store.get_item("todos", "1").await.unwrap(),
        Some(json!({"id": 1, "completed": true}))
    );
}

#[tokio::test]
async fn offline_write_keeps_full_url_and_headers() {
    let h = Harness::new(false).await;
    let request = Request::patch(url("/todos/5?notify=false"), json!({"id": 5, "title": "t"}))
        .with_header("x-request-id", "abc");

    h.interceptor.send(request.clone(), Some(&todos())).await.unwrap();

    let queue = h.store.list_mutations().await.unwrap();
    assert_eq!(queue[0].to_request(), request);
}

#[tokio::test]
async fn offline_create_without_id_uses_provisional_key() {
    let h = Harness::new(false).await;

    h.interceptor
        .send(Request::post(url("/todos"), json!({"title": "x"})), Some(&todos()))
        .await
        .unwrap();

    let queue = h.store.list_mutations().await.unwrap();
    assert!(queue[0].provisional);
    let key = format!("local-{}", queue[0].id);
    assert_eq!(h.store.get_item("todos", &key).await.unwrap(), Some(json!({"title": "x"})));

    // Offline reads see the pending item
    let listed = h.interceptor.send(Request::get(url("/todos")), Some(&todos())).await.unwrap();
    assert_eq!(listed.body, Some(json!([{"title": "x"}])));
}

#[tokio::test]
async fn offline_delete_uses_id_from_url() {
    let h = Harness::new(false).await;
    h.store.put_items("todos", &[json!({"id": 1}), json!({"id": 2})]).await.unwrap();

    let response = h.interceptor.send(Request::delete(url("/todos/1")), Some(&todos())).await.unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(h.store.get_item("todos", "1").await.unwrap(), None);
    assert_eq!(h.store.pending_count().await.unwrap(), 1);
}

// ===== Online reads =====

#[tokio::test]
async fn online_get_stores_collection_when_asked() {
    let h = Harness::new(true).await;
    h.store.put_items("todos", &[json!({"id": 9, "title": "stale"})]).await.unwrap();
    h.transport.push(Reply::Ok(200, Some(json!([{"id": 1}, {"id": 2}]))));

    let response = h
        .interceptor
        .send(Request::get(url("/todos")), Some(&todos().store()))
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    let mut cached = h.store.get_collection("todos").await.unwrap();
    cached.sort_by_key(|i| i["id"].as_i64());
    assert_eq!(cached, vec![json!({"id": 1}), json!({"id": 2})]);
}

#[tokio::test]
async fn online_get_by_id_upserts_single_item() {
    let h = Harness::new(true).await;
    h.store.put_items("todos", &[json!({"id": 1, "title": "old"}), json!({"id": 2})]).await.unwrap();
    h.transport.push(Reply::Ok(200, Some(json!({"id": 1, "title": "new"}))));

    h.interceptor
        .send(Request::get(url("/todos/1")), Some(&todos().store()))
        .await
        .unwrap();

    assert_eq!(h.store.get_item("todos", "1").await.unwrap(), Some(json!({"id": 1, "title": "new"})));
    assert_eq!(h.store.get_item("todos", "2").await.unwrap(), Some(json!({"id": 2})));
}

#[tokio::test]
async fn online_get_without_store_leaves_cache_alone() {
    let h = Harness::new(true).await;
    h.transport.push(Reply::Ok(200, Some(json!([{"id": 1}]))));

    h.interceptor.send(Request::get(url("/todos")), Some(&todos())).await.unwrap();

    assert!(h.store.get_collection("todos").await.unwrap().is_empty());
}

#[tokio::test]
async fn online_get_failure_falls_back_when_configured() {
    let h = Harness::new(true).await;
    h.store.put_items("todos", &[json!({"id": 1})]).await.unwrap();
    h.transport.push(Reply::Status(503));
    h.transport.push(Reply::Status(503));

    let response = h
        .interceptor
        .send(Request::get(url("/todos")), Some(&todos().fallback_on_error()))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.body, Some(json!([{"id": 1}])));

    let err = h.interceptor.send(Request::get(url("/todos")), Some(&todos())).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
}

#[tokio::test]
async fn cache_buster_clears_collection_before_request() {
    let h = Harness::new(true).await;
    h.store.put_items("todos", &[json!({"id": 1}), json!({"id": 2})]).await.unwrap();
    h.transport.push(Reply::Status(500));

    let result = h
        .interceptor
        .send(Request::get(url("/todos")), Some(&todos().bust_cache()))
        .await;

    assert!(result.is_err());
    assert_eq!(h.transport.call_count(), 1);
    assert!(h.store.get_collection("todos").await.unwrap().is_empty());
}

#[tokio::test]
async fn cache_buster_keeps_normal_response_handling() {
    let h = Harness::new(true).await;
    h.store.put_items("todos", &[json!({"id": 1})]).await.unwrap();
    h.transport.push(Reply::Ok(200, Some(json!([{"id": 3}]))));

    h.interceptor
        .send(Request::get(url("/todos")), Some(&todos().bust_cache().store()))
        .await
        .unwrap();

    assert_eq!(h.store.get_collection("todos").await.unwrap(), vec![json!({"id": 3})]);
}

#[tokio::test]
async fn cache_buster_is_ignored_offline() {
    let h = Harness::new(false).await;
    h.store.put_items("todos", &[json!({"id": 1})]).await.unwrap();

    let response = h
        .interceptor
        .send(Request::get(url("/todos")), Some(&todos().bust_cache()))
        .await
        .unwrap();

    assert_eq!(response.body, Some(json!([{"id": 1}])));
}

// ===== Online writes =====

#[tokio::test]
async fn online_write_folds_response_into_cache() {
    let h = Harness::new(true).await;
    h.transport.push(Reply::Ok(201, Some(json!({"id": 42, "title": "x", "owner": "srv"}))));

    let response = h
        .interceptor
        .send(Request::post(url("/todos"), json!({"title": "x"})), Some(&todos()))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(
        h.store.get_collection("todos").await.unwrap(),
        vec![json!({"id": 42, "title": "x", "owner": "srv"})]
    );
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn online_write_accepts_text_success_reply() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/todos")
        .with_status(201)
        .with_body("Created")
        .create_async()
        .await;
    let h = Harness::new(true).await;
    let interceptor = Interceptor::new(
        h.store.clone(),
        Arc::new(HttpTransport::new().unwrap()),
        Connectivity::online(),
    );

    let response = interceptor
        .send(
            Request::post(format!("{}/todos", server.url()), json!({"title": "x"})),
            Some(&todos()),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(response.status, 201);
    assert_eq!(response.source, ResponseSource::Network);
    assert!(response.body.is_none());
    assert!(h.store.get_collection("todos").await.unwrap().is_empty());
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn online_delete_removes_cached_item() {
    let h = Harness::new(true).await;
    h.store.put_items("todos", &[json!({"id": 1}), json!({"id": 2})]).await.unwrap();
    h.transport.push(Reply::Ok(204, None));

    h.interceptor.send(Request::delete(url("/todos/1")), Some(&todos())).await.unwrap();

    assert_eq!(h.store.get_collection("todos").await.unwrap(), vec![json!({"id": 2})]);
}

#[tokio::test]
async fn online_write_failure_is_not_queued() {
    let h = Harness::new(true).await;
    h.transport.push(Reply::Status(500));

    let err = h
        .interceptor
        .send(Request::put(url("/todos/1"), json!({"id": 1})), Some(&todos()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)));
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
    assert!(h.store.get_collection("todos").await.unwrap().is_empty());
}

// ===== Pass-through =====

#[tokio::test]
async fn requests_without_collection_pass_through() {
    let h = Harness::new(false).await;

    let response = h
        .interceptor
        .send(Request::put(url("/todos/1"), json!({"id": 1})), None)
        .await
        .unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
    assert!(h.store.get_collection("todos").await.unwrap().is_empty());
}

#[tokio::test]
async fn other_methods_pass_through_with_collection() {
    let h = Harness::new(true).await;

    h.interceptor
        .send(Request::new(Method::Head, url("/todos")), Some(&todos().store()))
        .await
        .unwrap();

    assert_eq!(h.transport.calls()[0].method, Method::Head);
    assert!(h.store.get_collection("todos").await.unwrap().is_empty());
}
