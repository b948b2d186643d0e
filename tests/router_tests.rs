use mediagate::router::Router;
use mediagate::spec::{load_contract_str, PackageInfo, RouteMeta};

use http::Method;

fn example_spec() -> &'static str {
    r#"
openapi: 3.1.0
info:
  title: Recorder
  version: "1.0.0"
servers:
  - url: /api
paths:
  /recorded:
    get:
      x-handler-list: list_recorded
      responses:
        "200": { description: OK }
  /recorded/{id}:
    get:
      operationId: get_recorded
      parameters:
        - { name: id, in: path, required: true, schema: { type: integer } }
      responses:
        "200": { description: OK }
    delete:
      operationId: delete_recorded
      parameters:
        - { name: id, in: path, required: true, schema: { type: integer } }
      responses:
        "200": { description: OK }
  /recorded/{id}/encode:
    post:
      operationId: encode_recorded
      parameters:
        - { name: id, in: path, required: true, schema: { type: integer } }
      responses:
        "200": { description: OK }
  /recorded/upload:
    post:
      operationId: upload_recorded
      responses:
        "200": { description: OK }
  /channels/{channelId}/logo:
    get:
      operationId: get_channel_logo
      parameters:
        - { name: channelId, in: path, required: true, schema: { type: string } }
      responses:
        "200": { description: OK }
    head:
      operationId: head_channel_logo
      parameters:
        - { name: channelId, in: path, required: true, schema: { type: string } }
      responses:
        "200": { description: OK }
"#
}

fn parse_spec(yaml: &str) -> Vec<RouteMeta> {
    load_contract_str(yaml, &PackageInfo::current())
        .expect("failed to load contract")
        .routes
}

fn router() -> Router {
    Router::new(parse_spec(example_spec())).expect("routing table")
}

fn assert_route_match(router: &Router, method: Method, path: &str, expected_handler: &str) {
    match router.route(&method, path) {
        Some(m) => assert_eq!(
            m.handler_name(),
            expected_handler,
            "handler mismatch for {method} {path}"
        ),
        None => assert_eq!(expected_handler, "<none>", "expected {method} {path} to match"),
    }
}

#[test]
fn test_router_list_via_extension() {
    assert_route_match(&router(), Method::GET, "/api/recorded", "list_recorded");
}

#[test]
fn test_router_get_by_id() {
    let router = router();
    assert_route_match(&router, Method::GET, "/api/recorded/123", "get_recorded");
    let m = router.route(&Method::GET, "/api/recorded/123").unwrap();
    assert_eq!(m.get_path_param("id"), Some("123"));
}

#[test]
fn test_router_delete_by_id() {
    assert_route_match(&router(), Method::DELETE, "/api/recorded/9", "delete_recorded");
}

#[test]
fn test_router_static_segment_beats_param() {
    let router = router();
    assert_route_match(&router, Method::POST, "/api/recorded/upload", "upload_recorded");
    assert_route_match(&router, Method::POST, "/api/recorded/5/encode", "encode_recorded");
}

#[test]
fn test_router_head_is_its_own_method() {
    let router = router();
    assert_route_match(&router, Method::HEAD, "/api/channels/GR_27/logo", "head_channel_logo");
    assert_route_match(&router, Method::GET, "/api/channels/GR_27/logo", "get_channel_logo");
}

#[test]
fn test_router_base_path_required() {
    assert_route_match(&router(), Method::GET, "/recorded", "<none>");
}

#[test]
fn test_router_unknown_path_and_method() {
    let router = router();
    assert_route_match(&router, Method::GET, "/api/unknown", "<none>");
    assert_route_match(&router, Method::PUT, "/api/recorded/1", "<none>");
}

#[test]
fn test_router_decodes_params() {
    let m = router()
        .route(&Method::GET, "/api/channels/BS%2015/logo")
        .unwrap();
    assert_eq!(m.get_path_param("channelId"), Some("BS 15"));
}

#[test]
fn test_router_rejects_ambiguous_contract() {
    let yaml = r#"
openapi: 3.1.0
info: { title: t, version: "1" }
paths:
  /rules/{id}:
    get:
      operationId: get_rule
      responses: { "200": { description: OK } }
  /rules/{ruleId}:
    get:
      operationId: get_rule_again
      responses: { "200": { description: OK } }
"#;
    let err = Router::new(parse_spec(yaml)).unwrap_err().to_string();
    assert!(err.contains("ambiguous"), "{err}");
    assert!(err.contains("/rules/{id}") && err.contains("/rules/{ruleId}"), "{err}");
}
