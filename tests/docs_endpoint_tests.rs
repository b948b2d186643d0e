#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::fixture::{start_with, TestGate};
use common::http::get;

fn gate() -> TestGate {
    start_with(|_| {}, |_, _| {})
}

#[test]
fn test_debug_redirects_to_viewer() {
    let gate = gate();
    let resp = get(gate.addr, "/api/debug");
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("location"), Some("/api-docs/?url=/api/docs"));
}

#[test]
fn test_viewer_page() {
    let gate = gate();
    for path in ["/api-docs", "/api-docs/"] {
        let resp = get(gate.addr, path);
        assert_eq!(resp.status, 200, "{path}");
        assert!(resp.header("content-type").unwrap().starts_with("text/html"));
        let body = resp.text();
        assert!(body.contains("SwaggerUIBundle"));
        assert!(body.contains("<title>mediagate</title>"));
        assert!(body.contains("/api/docs"));
    }
}

#[test]
fn test_contract_document_endpoints() {
    let gate = gate();
    for path in ["/docs", "/api/docs"] {
        let resp = get(gate.addr, path);
        assert_eq!(resp.status, 200, "{path}");
        assert_eq!(resp.header("content-type"), Some("application/json"));
        let doc = resp.json();
        assert_eq!(doc["info"]["title"], "mediagate");
        assert_eq!(doc["info"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(doc["paths"]["/items/{id}"]["get"].is_object());
    }
}

#[test]
fn test_viewer_is_get_only() {
    let gate = gate();
    let resp = common::http::send_request(gate.addr, "POST", "/api/debug", &[], b"");
    assert_eq!(resp.status, 404);
}
