//! In-process stand-ins for the Uploads API and the staging bucket.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::runtime::Runtime;

/// Requests seen by a stub, one line each.
pub type Calls = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &Calls) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// HTTP server on an ephemeral port with its own runtime, stopped on drop.
pub struct StubServer {
    pub addr: SocketAddr,
    runtime: Option<Runtime>,
}

impl StubServer {
    pub fn start(router: Router) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        runtime.spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        StubServer {
            addr,
            runtime: Some(runtime),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Credentials pointing at bucket `b`, key `k`.
pub fn staging_credentials() -> Value {
    json!({
        "accessKeyId": "ASIASTUB",
        "secretAccessKey": "stub-secret",
        "sessionToken": "stub-session",
        "bucket": "b",
        "key": "k",
        "url": "https://store/b/k"
    })
}

/// Canned behaviour of the Uploads API stub.
#[derive(Clone)]
pub struct ApiStub {
    pub credentials: (StatusCode, Value),
    pub conversion: (StatusCode, Value),
    /// `credentials <user> <token>` and `convert <user> <token> <body>` lines.
    pub calls: Calls,
}

impl Default for ApiStub {
    fn default() -> Self {
        ApiStub {
            credentials: (StatusCode::OK, staging_credentials()),
            conversion: (
                StatusCode::CREATED,
                json!({"id": "job-1", "complete": false, "error": null}),
            ),
            calls: Calls::default(),
        }
    }
}

impl ApiStub {
    pub fn router(self) -> Router {
        Router::new()
            .route("/uploads/v1/:user/credentials", post(issue_credentials))
            .route("/uploads/v1/:user", post(convert))
            .fallback(unexpected)
            .with_state(self)
    }
}

async fn issue_credentials(
    State(stub): State<ApiStub>,
    Path(user): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let token = query.get("access_token").cloned().unwrap_or_default();
    stub.calls
        .lock()
        .unwrap()
        .push(format!("credentials {} {}", user, token));
    let (status, body) = stub.credentials;
    (status, Json(body))
}

async fn convert(
    State(stub): State<ApiStub>,
    Path(user): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(request): Json<Value>,
) -> impl IntoResponse {
    let token = query.get("access_token").cloned().unwrap_or_default();
    stub.calls
        .lock()
        .unwrap()
        .push(format!("convert {} {} {}", user, token, request));
    let (status, body) = stub.conversion;
    (status, Json(body))
}

async fn unexpected(State(stub): State<ApiStub>, method: Method, uri: Uri) -> StatusCode {
    stub.calls
        .lock()
        .unwrap()
        .push(format!("unexpected {} {}", method, uri));
    StatusCode::NOT_FOUND
}

/// Path-style S3 stand-in. Records one line per operation
/// (`put`, `create`, `part N`, `complete`, `abort`).
#[derive(Clone, Default)]
pub struct S3Stub {
    /// Answer every UploadPart with a 500 after reading its first frame.
    pub fail_parts: bool,
    pub calls: Calls,
}

impl S3Stub {
    pub fn router(self) -> Router {
        Router::new().fallback(handle_s3).with_state(self)
    }
}

fn has_param(query: &str, name: &str) -> bool {
    query
        .split('&')
        .any(|pair| pair == name || pair.starts_with(&format!("{}=", name)))
}

fn param<'q>(query: &'q str, name: &str) -> Option<&'q str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(&format!("{}=", name)))
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

async fn handle_s3(State(stub): State<S3Stub>, method: Method, uri: Uri, body: Body) -> Response {
    let query = uri.query().unwrap_or("").to_string();
    let record = |line: String| stub.calls.lock().unwrap().push(line);

    if method == Method::POST && has_param(&query, "uploads") {
        record("create".into());
        return xml(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Bucket>b</Bucket><Key>k</Key><UploadId>upload-1</UploadId>\
             </InitiateMultipartUploadResult>"
        ));
    }
    if method == Method::POST && has_param(&query, "uploadId") {
        let _ = body.collect().await;
        record("complete".into());
        return xml(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <CompleteMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Location>https://store/b/k</Location><Bucket>b</Bucket><Key>k</Key>\
             <ETag>\"stub-etag-2\"</ETag></CompleteMultipartUploadResult>"
                .to_string(),
        );
    }
    if method == Method::DELETE {
        record("abort".into());
        return StatusCode::NO_CONTENT.into_response();
    }
    if method == Method::PUT {
        let part = param(&query, "partNumber").map(str::to_string);
        if let Some(number) = &part {
            record(format!("part {}", number));
            if stub.fail_parts {
                let mut body = body;
                let _ = body.frame().await;
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "application/xml")],
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                     <Error><Code>InternalError</Code>\
                     <Message>We encountered an internal error. Please try again.</Message></Error>",
                )
                    .into_response();
            }
        } else {
            record("put".into());
        }
        let _ = body.collect().await;
        return (
            StatusCode::OK,
            [(header::ETAG, format!("\"stub-etag-{}\"", part.as_deref().unwrap_or("0")))],
        )
            .into_response();
    }

    record(format!("unexpected {} {}", method, uri));
    StatusCode::NOT_IMPLEMENTED.into_response()
}
