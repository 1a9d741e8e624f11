use server_proxy::http::request::ParseError;
use server_proxy::http::{HttpRequest, HttpResponse, Method};

const MAX_BODY: usize = 1_048_576;

#[test]
fn test_simple_get_request() {
    let mut req = HttpRequest::new(MAX_BODY);
    let raw = b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";

    let complete = req.feed(raw).unwrap();

    assert!(complete);
    assert_eq!(req.method, Method::Get);
    assert_eq!(req.url, "/index.html");
    assert!(req.is_complete());
    assert_eq!(req.header("host").unwrap(), "localhost");
}

#[test]
fn test_fragmented_headers() {
    let mut req = HttpRequest::new(MAX_BODY);

    // Chunk 1: incomplete request line.
    assert_eq!(req.feed(b"GET /path ").unwrap(), false);

    // Chunk 2: request line completes, no headers yet.
    assert_eq!(req.feed(b"HTTP/1.1\r\n").unwrap(), false);
    assert!(!req.is_complete());

    // Chunk 3: headers complete.
    assert!(req.feed(b"User-Agent: test\r\n\r\n").unwrap());
    assert!(req.is_complete());
}

#[test]
fn test_post_request_with_body() {
    let mut req = HttpRequest::new(MAX_BODY);
    let raw = b"POST /api HTTP/1.1\r\nContent-Length: 13\r\n\r\nHello, World!";

    assert!(req.feed(raw).unwrap());
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.body, b"Hello, World!");
    assert!(req.is_complete());
}

#[test]
fn test_post_fragmented_body() {
    let mut req = HttpRequest::new(MAX_BODY);
    let head = b"POST /data HTTP/1.1\r\nContent-Length: 10\r\n\r\n";

    assert_eq!(req.feed(head).unwrap(), false);
    assert_eq!(req.feed(b"12345").unwrap(), false);
    assert!(req.feed(b"67890").unwrap());
    assert_eq!(req.body, b"1234567890");
    assert!(req.is_complete());
}

#[test]
fn test_invalid_method() {
    let mut req = HttpRequest::new(MAX_BODY);
    let result = req.feed(b"PATCH /invalid HTTP/1.1\r\n\r\n");
    assert_eq!(result.unwrap_err(), ParseError::InvalidMethod);
}

#[test]
fn test_partial_request_parsing() {
    let mut req = HttpRequest::new(MAX_BODY);

    req.feed(b"GET /index.html HTTP/1.1\r\n").unwrap();
    assert!(!req.is_complete());
    assert_eq!(req.url, "/index.html");

    assert!(req.feed(b"Host: localhost\r\n\r\n").unwrap());
    assert!(req.is_complete());
    assert_eq!(req.header("host").unwrap(), "localhost");
}

#[test]
fn test_oversized_body_is_rejected() {
    let mut req = HttpRequest::new(4);
    let raw = b"POST /upload HTTP/1.1\r\nContent-Length: 10\r\n\r\n";
    let result = req.feed(raw);
    assert_eq!(result.unwrap_err(), ParseError::PayloadTooLarge);
}

#[test]
fn test_response_generation() {
    let mut res = HttpResponse::new(200, "OK");
    res.set_header("content-type", "text/plain");
    res.set_body(b"Hello Rust".to_vec(), "text/plain");

    let bytes = res.to_bytes();
    let s = String::from_utf8_lossy(&bytes);

    assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(s.contains("Content-Type: text/plain\r\n"));
    assert!(s.contains("Content-Length: 10\r\n"));
    assert!(s.ends_with("\r\n\r\nHello Rust"));
}

#[test]
fn test_not_modified_strips_body() {
    let mut res = HttpResponse::new(200, "OK");
    res.set_body(b"ignored".to_vec(), "text/plain");
    res.set_status_code(304);
    res.verify();

    assert!(res.to_bytes().ends_with(b"\r\n\r\n"));
}
