use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use mediagate::allowlist::AllowlistGate;
use mediagate::error::{GateError, Result};
use mediagate::ingest::{Ingestor, MessageRing};
use mediagate::ports::{
    AttachmentRef, ChatKind, FetchedAttachment, IncomingEvent, MessengerPort,
};
use mediagate::server::{create_server, AppState};
use mediagate::store::ArtifactStore;
use serde_json::Value;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

struct StubMessenger;

#[async_trait]
impl MessengerPort for StubMessenger {
    async fn next_batch(&self) -> Result<Vec<IncomingEvent>> {
        Ok(vec![])
    }
    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<FetchedAttachment> {
        if attachment.file_id == "f1" {
            Ok(FetchedAttachment {
                bytes: b"file-bytes".to_vec(),
                file_name: "fetched.bin".to_string(),
                source_url: "https://files.example/f1".to_string(),
            })
        } else {
            Err(GateError::Api {
                message: "unknown file".to_string(),
            })
        }
    }
    async fn chat_members(&self, _chat_id: i64) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

struct TestApp {
    state: Arc<AppState>,
    _tmp: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let tmp = tempdir().unwrap();
    let store = Arc::new(ArtifactStore::open(tmp.path()).unwrap());
    let ring = Arc::new(MessageRing::new(64));
    let messenger: Arc<dyn MessengerPort> = Arc::new(StubMessenger);
    let ingestor = Arc::new(Ingestor::new(
        messenger.clone(),
        Arc::new(AllowlistGate::disabled()),
        store.clone(),
        ring.clone(),
        None,
        1024,
    ));
    TestApp {
        state: Arc::new(AppState {
            store,
            ring,
            ingestor,
            messenger,
            sheets: None,
        }),
        _tmp: tmp,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn index_reports_liveness() {
    let app = test_app();
    let response = create_server(app.state.clone()).oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn last_file_is_404_until_an_ingestion() {
    let app = test_app();
    let router = create_server(app.state.clone());

    let response = router.clone().oneshot(get("/last_file")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");

    app.state
        .store
        .put("a.bin", b"123", "url", 1, "alice")
        .unwrap();
    let response = router.oneshot(get("/last_file")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["file_name"], "a.bin");
    assert_eq!(body["file_size"], 3);
    assert_eq!(body["exists"], true);
}

#[tokio::test]
async fn download_file_returns_exact_bytes_with_disposition() {
    let app = test_app();
    app.state
        .store
        .put("report.pdf", b"pdf-bytes", "url", 1, "alice")
        .unwrap();

    let response = create_server(app.state.clone())
        .oneshot(get("/download_file/report.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"pdf-bytes");
}

#[tokio::test]
async fn download_file_neutralizes_traversal() {
    let app = test_app();
    app.state
        .store
        .put("inside.txt", b"safe", "url", 1, "alice")
        .unwrap();
    let router = create_server(app.state.clone());

    let response = router
        .clone()
        .oneshot(get("/download_file/..%2F..%2Fetc%2Fpasswd"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.oneshot(get("/download_file/a/b/c")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_file_and_cleanup_report_counts() {
    let app = test_app();
    app.state.store.put("a.bin", b"1", "url", 1, "alice").unwrap();
    app.state.store.put("b.bin", b"2", "url", 1, "alice").unwrap();
    let router = create_server(app.state.clone());

    let response = router
        .clone()
        .oneshot(post_json("/delete_file/a.bin", Value::Null))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(post_json("/delete_file/a.bin", Value::Null))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.clone().oneshot(post_json("/cleanup", Value::Null)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["files_deleted"], 1);

    let response = router.oneshot(get("/last_file")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ad_hoc_download_uses_the_message_ring() {
    let app = test_app();
    let router = create_server(app.state.clone());

    let params = serde_json::json!({ "chat": 7, "message_id": 100 });
    let response = router
        .clone()
        .oneshot(post_json("/download", params.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.state.ring.push(IncomingEvent {
        chat_id: 7,
        chat_kind: ChatKind::Private,
        sender: "alice".to_string(),
        message_id: 100,
        text: String::new(),
        attachment: Some(AttachmentRef {
            file_id: "f1".to_string(),
            file_name: "fetched.bin".to_string(),
            mime_type: None,
            declared_size: Some(10),
        }),
        received_at: Utc::now(),
    });

    let response = router.oneshot(post_json("/download", params)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["artifact"]["file_name"], "fetched.bin");
    assert_eq!(body["artifact"]["file_size"], 10);
}

#[tokio::test]
async fn last_messages_summarizes_ring_contents() {
    let app = test_app();
    for id in 1..=3 {
        app.state.ring.push(IncomingEvent {
            chat_id: 7,
            chat_kind: ChatKind::Private,
            sender: "alice".to_string(),
            message_id: id,
            text: format!("msg {}", id),
            attachment: None,
            received_at: Utc::now(),
        });
    }

    let response = create_server(app.state.clone())
        .oneshot(get("/last_messages?chat=7&limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let ids: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(body[0]["has_media"], false);
}

#[tokio::test]
async fn malformed_input_gets_the_json_error_envelope() {
    let app = test_app();
    let router = create_server(app.state.clone());

    // Body that is not the expected shape.
    let response = router
        .clone()
        .oneshot(post_json("/download", serde_json::json!({ "chat": "not-a-number" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
    assert!(body["message"].is_string());

    // Required query parameter missing.
    let response = router.oneshot(get("/last_messages?limit=2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn update_whitelist_requires_sheet_configuration() {
    let app = test_app();
    let params = serde_json::json!({
        "chat_id": 7,
        "sheet_name": "sheet-1",
        "worksheet_name": "Whitelist"
    });
    let response = create_server(app.state.clone())
        .oneshot(post_json("/update_whitelist", params))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
