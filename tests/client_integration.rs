use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::any,
    Json, Router,
};
use futures::StreamExt;
use reach_http::{
    header::{HeaderMap as RequestHeaders, HeaderName, HeaderValue},
    ApiClient, CacheOptions, ClientOptions, ErrorKind, LoadStrategy, MemoryStore, RequestData,
    RequestOptions, ResponseBody, ResponseType, StatusCategory, ThrowOptions, TimeoutOptions,
};
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: String,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self::raw(status, body.to_string())
    }

    fn raw(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: Duration::from_millis(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    hits: Arc<AtomicUsize>,
}

async fn queued_handler(State(state): State<MockState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    (response.status, response.body)
}

async fn echo_handler(
    State(state): State<MockState>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: String,
) -> Json<JsonValue> {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    Json(json!({
        "method": method.as_str(),
        "query": query,
        "content_type": header("content-type"),
        "api_key": header("x-api-key"),
        "body": body,
    }))
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn client(&self) -> ApiClient {
        ApiClient::new(ClientOptions::default().with_base_url(self.base_url.clone()))
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/items", any(queued_handler))
        .route("/echo", any(echo_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        task,
    }
}

#[tokio::test]
async fn get_builds_url_from_base_and_query() {
    let server = spawn_server(Vec::new()).await;

    let response = server
        .client()
        .get(
            "/echo",
            RequestData::new()
                .with_query("page", "2")
                .with_query("q", "rust lang"),
            RequestOptions::new(),
        )
        .await
        .expect("echo must succeed");

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.category, StatusCategory::Success);
    let body = response.body.as_json().expect("echo answers json");
    assert_eq!(body["method"], "GET");
    assert_eq!(body["query"], "page=2&q=rust+lang");
}

#[tokio::test]
async fn post_json_body_sets_content_type() {
    let server = spawn_server(Vec::new()).await;

    let response = server
        .client()
        .post(
            "/echo",
            RequestData::new().with_json(json!({"name": "Kit"})),
            RequestOptions::new(),
        )
        .await
        .expect("echo must succeed");

    let body = response.body.as_json().expect("echo answers json");
    assert_eq!(body["method"], "POST");
    assert_eq!(body["content_type"], "application/json; charset=utf-8");
    assert_eq!(body["body"], r#"{"name":"Kit"}"#);
}

#[tokio::test]
async fn put_form_body_is_url_encoded() {
    let server = spawn_server(Vec::new()).await;

    let response = server
        .client()
        .put(
            "/echo",
            RequestData::new().with_form([("a", "1"), ("b", "two")]),
            RequestOptions::new(),
        )
        .await
        .expect("echo must succeed");

    let body = response.body.as_json().expect("echo answers json");
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(body["body"], "a=1&b=two");
}

#[tokio::test]
async fn client_headers_are_sent_and_request_headers_override() {
    let server = spawn_server(Vec::new()).await;
    let mut headers = RequestHeaders::new();
    headers.insert("x-api-key", HeaderValue::from_static("client-key"));
    let client = ApiClient::new(
        ClientOptions::default()
            .with_base_url(server.base_url.clone())
            .with_headers(headers),
    );

    let first = client
        .get("/echo", RequestData::new(), RequestOptions::new())
        .await
        .expect("echo must succeed");
    assert_eq!(first.body.as_json().expect("json")["api_key"], "client-key");

    let second = client
        .get(
            "/echo",
            RequestData::new().with_header(
                HeaderName::from_static("x-api-key"),
                HeaderValue::from_static("call-key"),
            ),
            RequestOptions::new(),
        )
        .await
        .expect("echo must succeed");
    assert_eq!(second.body.as_json().expect("json")["api_key"], "call-key");
}

#[tokio::test]
async fn retries_on_server_error_status() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"})),
        MockResponse::json(StatusCode::OK, json!({"ok": true})),
    ])
    .await;

    let response = server
        .client()
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().retries(1, Duration::from_millis(1)),
        )
        .await
        .expect("request must succeed after retry");

    assert_eq!(response.body.as_json(), Some(&json!({"ok": true})));
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn client_error_carries_the_response() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::NOT_FOUND,
        json!({"error": "NF"}),
    )])
    .await;

    let err = server
        .client()
        .get("/items", RequestData::new(), RequestOptions::new())
        .await
        .expect_err("404 must fail");

    assert_eq!(err.kind(), ErrorKind::HttpClient);
    let response = err.response().expect("http error carries response");
    assert_eq!(response.status, 404);
    assert_eq!(response.body.as_json(), Some(&json!({"error": "NF"})));
}

#[tokio::test]
async fn server_error_resolves_when_throw_is_off() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::BAD_GATEWAY,
        json!({"error": "upstream"}),
    )])
    .await;

    let response = server
        .client()
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().throw(ThrowOptions {
                on_server_error_responses: false,
                ..ThrowOptions::default()
            }),
        )
        .await
        .expect("502 must resolve");

    assert_eq!(response.status, 502);
    assert_eq!(response.category, StatusCategory::ServerError);
}

#[tokio::test]
async fn html_body_is_a_data_type_mismatch() {
    let server = spawn_server(vec![MockResponse::raw(StatusCode::OK, "<html></html>")]).await;

    let err = server
        .client()
        .get("/items", RequestData::new(), RequestOptions::new())
        .await
        .expect_err("html is not json");

    assert_eq!(err.kind(), ErrorKind::ResponseDataTypeMismatch);
    assert_eq!(
        err.response().and_then(|r| r.body.as_text()),
        Some("<html></html>")
    );
}

#[tokio::test]
async fn text_and_binary_response_types() {
    let server = spawn_server(vec![
        MockResponse::raw(StatusCode::OK, "plain words"),
        MockResponse::raw(StatusCode::OK, "raw bytes"),
    ])
    .await;
    let client = server.client();

    let text = client
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().response_type(ResponseType::Text),
        )
        .await
        .expect("text must resolve");
    assert_eq!(text.body.as_text(), Some("plain words"));

    let binary = client
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().response_type(ResponseType::Binary),
        )
        .await
        .expect("binary must resolve");
    assert_eq!(
        binary.body.as_bytes().map(|bytes| bytes.as_ref()),
        Some(&b"raw bytes"[..])
    );
}

#[tokio::test]
async fn stream_response_type_yields_chunks() {
    let server = spawn_server(vec![MockResponse::raw(StatusCode::OK, "streamed body")]).await;

    let response = server
        .client()
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().response_type(ResponseType::Stream),
        )
        .await
        .expect("stream must resolve");

    let mut stream = match response.body {
        ResponseBody::Stream(stream) => stream,
        other => panic!("expected stream body, got {other:?}"),
    };
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk.expect("chunk must arrive"));
    }
    assert_eq!(collected, b"streamed body");
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!({"ok": true}))
        .with_delay(Duration::from_millis(150))])
    .await;

    let err = server
        .client()
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().timeout(TimeoutOptions::new(
                Duration::from_millis(20),
                Duration::from_secs(5),
            )),
        )
        .await
        .expect_err("request must time out");

    assert_eq!(err.kind(), ErrorKind::Timeout);
    let details = err.abort_details().expect("timeout carries details");
    assert!(details.timeout);
    assert_eq!(details.tries, 1);
}

#[tokio::test]
async fn cached_get_skips_the_network() {
    let server = spawn_server(vec![MockResponse::json(StatusCode::OK, json!({"n": 1}))]).await;
    let store = Arc::new(MemoryStore::new());
    let options = RequestOptions::new().cache(CacheOptions::new(store.clone()));
    let client = server.client();

    let first = client
        .get("/items", RequestData::new(), options.clone())
        .await
        .expect("first call must succeed");
    assert!(!first.cached);

    // The write lands after delivery.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = client
        .get("/items", RequestData::new(), options)
        .await
        .expect("second call must be cached");
    assert!(second.cached);
    assert_eq!(second.status, 200);
    assert_eq!(second.body.as_json(), Some(&json!({"n": 1})));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn cache_only_with_empty_store_fails_without_request() {
    let server = spawn_server(Vec::new()).await;

    let err = server
        .client()
        .get(
            "/items",
            RequestData::new(),
            RequestOptions::new().cache(
                CacheOptions::new(Arc::new(MemoryStore::new()))
                    .load_strategy(LoadStrategy::CacheOnly),
            ),
        )
        .await
        .expect_err("cache-only miss must fail");

    assert_eq!(err.kind(), ErrorKind::CacheMiss);
    assert_eq!(server.hits(), 0);
}
