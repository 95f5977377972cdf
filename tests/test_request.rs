use std::collections::HashMap;
use webserv::http::request::{Method, Request, RequestBuilder};

fn request_with(headers: &[(&str, &str)]) -> Request {
    let headers: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect();

    Request {
        method: Method::GET,
        path: "/".to_string(),
        query: String::new(),
        version: "HTTP/1.1".to_string(),
        headers,
        body: vec![],
    }
}

#[test]
fn test_request_header_lookup_ignores_case() {
    let req = request_with(&[("Host", "example.com"), ("Content-Type", "application/json")]);

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("HOST"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    assert_eq!(request_with(&[("Content-Length", "42")]).content_length(), 42);
    assert_eq!(request_with(&[]).content_length(), 0);
    assert_eq!(
        request_with(&[("Content-Length", "not-a-number")]).content_length(),
        0
    );
}

#[test]
fn test_request_keep_alive_requires_header() {
    // Without an explicit Connection header the connection is closed
    assert!(!request_with(&[]).keep_alive());
    assert!(request_with(&[("Connection", "keep-alive")]).keep_alive());
    assert!(request_with(&[("Connection", "Keep-Alive")]).keep_alive());
    assert!(request_with(&[("Connection", "Upgrade, keep-alive")]).keep_alive());
    assert!(!request_with(&[("Connection", "close")]).keep_alive());
}

#[test]
fn test_request_chunked_detection() {
    assert!(request_with(&[("Transfer-Encoding", "chunked")]).is_chunked());
    assert!(request_with(&[("Transfer-Encoding", "gzip, Chunked")]).is_chunked());
    assert!(!request_with(&[("Transfer-Encoding", "gzip")]).is_chunked());
    assert!(!request_with(&[]).is_chunked());
}

#[test]
fn test_request_host_strips_port() {
    assert_eq!(request_with(&[("Host", "example.com:8080")]).host(), Some("example.com"));
    assert_eq!(request_with(&[("Host", "example.com")]).host(), Some("example.com"));
    assert_eq!(request_with(&[("Host", "[::1]:80")]).host(), Some("[::1]"));
    assert_eq!(request_with(&[("Host", "[::1]")]).host(), Some("[::1]"));
}

#[test]
fn test_request_target_rejoins_query() {
    let mut req = request_with(&[]);
    req.path = "/search".to_string();
    assert_eq!(req.target(), "/search");

    req.query = "q=rust".to_string();
    assert_eq!(req.target(), "/search?q=rust");
}

#[test]
fn test_method_parse() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
    ];

    for (name, expected) in methods {
        let method = Method::parse(name);
        assert_eq!(method, expected);
        assert_eq!(method.as_str(), name);
    }

    assert_eq!(Method::parse("BREW"), Method::Other("BREW".to_string()));
    assert_eq!(Method::parse("BREW").to_string(), "BREW");
}

#[test]
fn test_request_builder() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .path("/api")
        .query("a=1")
        .header("Content-Type", "text/plain")
        .body(b"data".to_vec())
        .build()
        .unwrap();

    assert_eq!(req.method, Method::POST);
    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.header("content-type"), Some("text/plain"));
    assert_eq!(req.body, b"data".to_vec());
}

#[test]
fn test_request_builder_missing_fields() {
    assert!(RequestBuilder::new().path("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}
