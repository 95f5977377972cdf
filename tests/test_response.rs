use webserv::http::response::{Response, ResponseBuilder, StatusCode};

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::OK.as_u16(), 200);
    assert_eq!(StatusCode::NO_CONTENT.as_u16(), 204);
    assert_eq!(StatusCode::BAD_REQUEST.as_u16(), 400);
    assert_eq!(StatusCode::PAYLOAD_TOO_LARGE.as_u16(), 413);
    assert_eq!(StatusCode::VERSION_NOT_SUPPORTED.as_u16(), 505);
    assert_eq!(StatusCode::from_u16(418).as_u16(), 418);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::PAYLOAD_TOO_LARGE.reason_phrase(), "Payload Too Large");
    assert_eq!(StatusCode::NOT_IMPLEMENTED.reason_phrase(), "Not Implemented");
    assert_eq!(
        StatusCode::VERSION_NOT_SUPPORTED.reason_phrase(),
        "HTTP Version Not Supported"
    );
    assert_eq!(StatusCode::from_u16(299).reason_phrase(), "Unknown Status");
}

#[test]
fn test_status_code_body_rules() {
    assert!(StatusCode::NO_CONTENT.forbids_body());
    assert!(StatusCode::NOT_MODIFIED.forbids_body());
    assert!(StatusCode::from_u16(100).forbids_body());
    assert!(!StatusCode::OK.forbids_body());
    assert!(StatusCode::BAD_REQUEST.is_error());
    assert!(!StatusCode::FOUND.is_error());
}

#[test]
fn test_response_builder_basic() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .body(b"Hello, World!".to_vec())
        .build();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.version, "HTTP/1.1");
    assert_eq!(response.body, b"Hello, World!".to_vec());
    // Framing headers are added by the writer
    assert!(response.headers.is_empty());
}

#[test]
fn test_response_builder_header_order_and_replace() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "value")
        .header("content-type", "text/html")
        .build();

    assert_eq!(
        response.headers,
        vec![
            ("Content-Type".to_string(), "text/html".to_string()),
            ("X-Custom".to_string(), "value".to_string()),
        ]
    );
    assert_eq!(response.header("CONTENT-TYPE"), Some("text/html"));
}

#[test]
fn test_response_remove_header() {
    let mut response = ResponseBuilder::new(StatusCode::OK)
        .header("X-One", "1")
        .build();

    assert_eq!(response.remove_header("x-one"), Some("1".to_string()));
    assert_eq!(response.remove_header("x-one"), None);
}

#[test]
fn test_response_closes_connection() {
    let keep = ResponseBuilder::new(StatusCode::OK)
        .header("Connection", "keep-alive")
        .build();
    let close = ResponseBuilder::new(StatusCode::OK)
        .header("Connection", "Close")
        .build();

    assert!(!keep.closes_connection());
    assert!(close.closes_connection());
    assert!(!Response::ok("x").closes_connection());
}

#[test]
fn test_response_helpers() {
    assert_eq!(Response::ok("test content").body, b"test content".to_vec());
    assert_eq!(Response::not_found().status, StatusCode::NOT_FOUND);
    assert_eq!(
        Response::internal_error().status,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[test]
fn test_error_page_is_html() {
    let response = Response::error_page(StatusCode::BAD_REQUEST);
    let body = String::from_utf8(response.body.clone()).unwrap();

    assert_eq!(response.header("Content-Type"), Some("text/html"));
    assert!(body.contains("<title>400 Bad Request</title>"));
    assert!(body.contains("<h1>400 Bad Request</h1>"));
}
