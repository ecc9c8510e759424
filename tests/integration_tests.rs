//! Integration tests using wiremock to simulate HTTP servers.

use microreq::{Auth, Caller, Encoding, Error, HttpTransport, Method, RequestOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestData {
    id: u32,
    name: String,
}

/// A caller with its own client, so connections never outlive a test's runtime.
fn caller(options: RequestOptions) -> Caller {
    Caller::with_transport(Arc::new(HttpTransport::new().unwrap()), options)
}

fn api(server: &MockServer) -> Caller {
    caller(RequestOptions::new().with_base_url(server.uri()))
}

#[tokio::test]
async fn test_get_returns_raw_bytes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("test response"))
        .mount(&mock_server)
        .await;

    let response = api(&mock_server).get("/test", None).await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body.as_bytes().unwrap(), "test response");
    assert!(response.url.ends_with("/test"));
    assert!(!response.was_redirected());
}

#[tokio::test]
async fn test_module_level_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let response = microreq::request(format!("{}/plain", mock_server.uri()), None)
        .await
        .unwrap();

    assert_eq!(response.text().as_deref(), Some("ok"));
}

#[tokio::test]
async fn test_post_text_body_sets_content_length() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(header("content-length", "13"))
        .and(body_string("test req body"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = api(&mock_server)
        .post("/test", Some("test req body".into()))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_post_json_body_and_typed_response() {
    let mock_server = MockServer::start().await;

    let response_data = TestData {
        id: 1,
        name: "New".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "id": 0, "name": "New" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(&response_data))
        .mount(&mock_server)
        .await;

    let body = microreq::Body::json(&TestData {
        id: 0,
        name: "New".to_string(),
    })
    .unwrap();
    let response = api(&mock_server).post("/users", Some(body)).await.unwrap();

    assert_eq!(response.json::<TestData>().unwrap(), response_data);
}

#[tokio::test]
async fn test_json_encoding_and_fallback() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "a": 1 })))
        .mount(&mock_server)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"a\"1}"))
        .mount(&mock_server)
        .await;

    let api = caller(
        RequestOptions::new()
            .with_base_url(mock_server.uri())
            .with_encoding(Encoding::Json),
    );

    let parsed = api.get("/json", None).await.unwrap();
    assert_eq!(parsed.body.as_json().unwrap(), &json!({ "a": 1 }));

    let fallback = api.get("/broken", None).await.unwrap();
    assert_eq!(fallback.body.as_text(), Some("{\"a\"1}"));

    match fallback.json::<TestData>() {
        Err(Error::DeserializationFailed {
            raw_response,
            status,
            ..
        }) => {
            assert_eq!(status.as_u16(), 200);
            assert_eq!(raw_response, "{\"a\"1}");
        }
        other => panic!("Expected DeserializationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_charset_encoding() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/latin1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"caf\xe9".to_vec()))
        .mount(&mock_server)
        .await;

    let response = api(&mock_server)
        .get(
            RequestOptions::new()
                .with_url("/latin1")
                .with_encoding(Encoding::from_label("latin1").unwrap()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(response.body.as_text(), Some("café"));
}

#[tokio::test]
async fn test_basic_auth_header() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/private"))
        .and(header("authorization", "Basic dTpw"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let api = caller(
        RequestOptions::new()
            .with_base_url(mock_server.uri())
            .with_auth(Auth::basic("u", "p")),
    );
    api.get("/private", None).await.unwrap();

    let with_credentials = mock_server.uri().replace("http://", "http://u:p@");
    caller(RequestOptions::new())
        .get(format!("{}/private", with_credentials), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_default_headers_merge_with_call_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/headers"))
        .and(header("x-unit-test", "789A"))
        .and(header("x-call", "1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let api = caller(
        RequestOptions::new()
            .with_base_url(mock_server.uri())
            .with_header("X-Unit-Test", "789A")
            .unwrap(),
    );
    let call_options = RequestOptions::new()
        .with_url("/headers")
        .with_header("x-call", "1")
        .unwrap();

    let response = api.get(call_options, None).await.unwrap();
    assert_eq!(response.status.as_u16(), 204);
}

#[tokio::test]
async fn test_follows_redirect() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/new"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = api(&mock_server)
        .put("/old", Some("payload".into()))
        .await
        .unwrap();

    assert_eq!(response.body.as_bytes().unwrap(), "moved");
    assert_eq!(response.redirects, 1);
    assert!(response.url.ends_with("/new"));
}

#[tokio::test]
async fn test_redirect_budget_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let api = caller(
        RequestOptions::new()
            .with_base_url(mock_server.uri())
            .with_max_redirects(2),
    );
    let err = api.get("/loop", None).await.unwrap_err();

    assert_eq!(err.code(), "REDIRECT");
    match err {
        Error::Redirect {
            location,
            max_redirects,
        } => {
            assert_eq!(location, "/loop");
            assert_eq!(max_redirects, 2);
        }
        other => panic!("Expected Redirect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_timeout_before_response() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let api = caller(
        RequestOptions::new()
            .with_base_url(mock_server.uri())
            .with_timeout(Duration::from_millis(50)),
    );
    let err = api.get("/slow", None).await.unwrap_err();

    assert_eq!(err.code(), "ETIMEDOUT");
    assert!(err.is_timeout());
    assert!(err.is_connect());
}

#[tokio::test]
async fn test_connection_refused() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = caller(RequestOptions::new())
        .get(format!("http://127.0.0.1:{}/", port), None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ECONNREFUSED");
    assert!(err.is_connect());
}

#[tokio::test]
async fn test_usage_error_before_sending() {
    let err = caller(RequestOptions::new())
        .get("ftp://localhost/file", None)
        .await
        .unwrap_err();
    assert!(err.is_usage());
    assert_eq!(err.code(), "EINVAL");
}

#[tokio::test]
async fn test_streamed_upload_and_download() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string("first,second"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let options = RequestOptions::new()
        .with_url("/upload")
        .with_method(Method::POST)
        .with_no_req_end(true)
        .with_no_res_listen(true);
    let mut call = api(&mock_server)
        .start(options, Some("first,".into()))
        .unwrap();

    let writer = call.body_writer().unwrap();
    writer.write("second").await.unwrap();
    writer.end();

    let response = call.response().await.unwrap();
    let body = response.into_stream().unwrap().bytes().await.unwrap();
    assert_eq!(body, "stored");
}

#[tokio::test]
async fn test_request_with_callback() {
    let mock_server = MockServer::start().await;

    Mock::given(path("/callback"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&mock_server)
        .await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    api(&mock_server)
        .request_with("/callback", None, move |result| {
            let _ = tx.send(result.map(|response| response.status.as_u16()));
        })
        .unwrap();

    assert_eq!(rx.await.unwrap().unwrap(), 202);
}

#[tokio::test]
async fn test_options_from_config() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/config"))
        .and(header("x-from-config", "yes"))
        .and(body_json(json!({ "enabled": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let options = RequestOptions::from_json(json!({
        "baseUrl": mock_server.uri(),
        "method": "patch",
        "headers": { "X-From-Config": "yes" },
        "body": { "enabled": true },
        "encoding": "json",
        "timeout": 5000,
    }))
    .unwrap();

    let response = caller(options).request("/config", None).await.unwrap();
    assert_eq!(response.body.as_json().unwrap(), &json!({ "ok": true }));
}
