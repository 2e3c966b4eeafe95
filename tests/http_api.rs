use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, Response, StatusCode, header},
};
use file_gateway::{config::AppConfig, routes::routes::routes, state::AppState};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "file-gateway-test-boundary";

async fn app() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let cfg = AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        storage_dir: dir.path().join("objects").to_string_lossy().into_owned(),
        database_url: "sqlite::memory:".into(),
        bucket: "uploads".into(),
        max_upload_bytes: 1024 * 1024,
        min_part_bytes: 0,
        max_sessions: 100,
        session_ttl_secs: None,
    };
    let state = AppState::from_config(&cfg).await.unwrap();
    (dir, routes(cfg.max_upload_bytes).with_state(state))
}

struct FormField<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    data: &'a [u8],
}

fn text(name: &'static str, value: &'static str) -> FormField<'static> {
    FormField { name, file_name: None, data: value.as_bytes() }
}

fn file<'a>(file_name: &'a str, data: &'a [u8]) -> FormField<'a> {
    FormField { name: "file", file_name: Some(file_name), data }
}

fn form_body(fields: &[FormField<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match field.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n",
                    field.name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field.name).as_bytes(),
            ),
        }
        body.extend_from_slice(field.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn form_request(uri: &str, fields: &[FormField<'_>]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(form_body(fields)))
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn initiate(app: &Router, file_name: &str) -> String {
    let response = send(
        app,
        json_request(
            Method::POST,
            "/api/uploads/initiate",
            json!({ "fileName": file_name, "contentType": "application/pdf" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["objectName"].as_str().unwrap().ends_with(file_name));
    body["uploadId"].as_str().unwrap().to_string()
}

async fn upload_part(app: &Router, upload_id: &str, part_number: &'static str, data: &[u8]) -> Response<Body> {
    send(
        app,
        form_request(
            &format!("/api/uploads/{}/parts", upload_id),
            &[text("partNumber", part_number), file("blob", data)],
        ),
    )
    .await
}

#[tokio::test]
async fn health_is_always_ok() {
    let (_dir, app) = app().await;
    let response = send(&app, empty_request(Method::GET, "/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn readiness_reports_checks_and_open_uploads() {
    let (_dir, app) = app().await;
    initiate(&app, "report.pdf").await;

    let response = send(&app, empty_request(Method::GET, "/readyz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
    assert_eq!(body["active_uploads"], 1);
}

#[tokio::test]
async fn multipart_upload_round_trip() {
    let (_dir, app) = app().await;
    let upload_id = initiate(&app, "report.pdf").await;

    let response = upload_part(&app, &upload_id, "2", b"-second-half").await;
    assert_eq!(response.status(), StatusCode::OK);
    let part = body_json(response).await;
    assert_eq!(part["partNumber"], 2);
    assert!(part["etag"].as_str().is_some());

    let response = upload_part(&app, &upload_id, "1", b"first-half").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        empty_request(Method::POST, &format!("/api/uploads/{}/complete", upload_id)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let record = &body["file"];
    assert_eq!(record["filename"], "report.pdf");
    assert_eq!(record["size"], 22);
    let id = record["id"].as_i64().unwrap();

    let response = send(&app, empty_request(Method::GET, &format!("/api/files/{}/download", id))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "22");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"first-half-second-half");

    // the session is gone once completed
    let response = upload_part(&app, &upload_id, "3", b"late").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let listed = body_json(send(&app, empty_request(Method::GET, "/api/files")).await).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (_dir, app) = app().await;
    let response = upload_part(&app, "never-initiated", "1", b"data").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["status"], 404);
    assert!(body["error"].as_str().unwrap().contains("never-initiated"));
}

#[tokio::test]
async fn abort_ends_the_session() {
    let (_dir, app) = app().await;
    let upload_id = initiate(&app, "report.pdf").await;
    upload_part(&app, &upload_id, "1", b"data").await;

    let abort_uri = format!("/api/uploads/{}/abort", upload_id);
    let response = send(&app, empty_request(Method::DELETE, &abort_uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "message": "Upload aborted successfully" })
    );

    let response = send(&app, empty_request(Method::DELETE, &abort_uri)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(
        &app,
        empty_request(Method::POST, &format!("/api/uploads/{}/complete", upload_id)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let listed = body_json(send(&app, empty_request(Method::GET, "/api/files")).await).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn completing_without_parts_conflicts() {
    let (_dir, app) = app().await;
    let upload_id = initiate(&app, "empty.bin").await;
    let response = send(
        &app,
        empty_request(Method::POST, &format!("/api/uploads/{}/complete", upload_id)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn bad_part_requests_are_rejected() {
    let (_dir, app) = app().await;
    let upload_id = initiate(&app, "report.pdf").await;

    let response = upload_part(&app, &upload_id, "0", b"data").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = upload_part(&app, &upload_id, "one", b"data").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        form_request(
            &format!("/api/uploads/{}/parts", upload_id),
            &[text("partNumber", "1")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // declared size disagrees with the bytes sent
    let response = send(
        &app,
        form_request(
            &format!("/api/uploads/{}/parts", upload_id),
            &[text("partNumber", "1"), text("size", "99"), file("blob", b"data")],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn malformed_initiate_is_bad_request() {
    let (_dir, app) = app().await;
    let response = send(
        &app,
        json_request(Method::POST, "/api/uploads/initiate", json!({ "name": 1 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_shot_upload_list_get_delete() {
    let (_dir, app) = app().await;
    let response = send(&app, form_request("/api/files", &[file("notes.txt", b"hello")])).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "File uploaded successfully");
    let id = body["file"]["id"].as_i64().unwrap();
    assert_eq!(body["file"]["size"], 5);

    let response = send(&app, empty_request(Method::GET, &format!("/api/files/{}", id))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["filename"], "notes.txt");
    assert!(record["filepath"].as_str().unwrap().ends_with("-notes.txt"));
    assert!(record["created_at"].is_string());
    assert!(record["updated_at"].is_string());

    let response = send(&app, empty_request(Method::DELETE, &format!("/api/files/{}", id))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, empty_request(Method::GET, &format!("/api/files/{}", id))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&app, empty_request(Method::DELETE, &format!("/api/files/{}", id))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let (_dir, app) = app().await;
    let response = send(&app, form_request("/api/files", &[text("other", "x")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_numeric_file_id_is_bad_request() {
    let (_dir, app) = app().await;
    let response = send(&app, empty_request(Method::GET, "/api/files/abc")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
