use super::Router;
use crate::spec::RouteMeta;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;

fn route(method: Method, path: &str, handler: &str) -> RouteMeta {
    RouteMeta {
        method,
        path_pattern: Arc::from(path),
        handler_name: Arc::from(handler),
        parameters: Vec::new(),
        request_body: None,
        response_schema: None,
        responses: HashMap::new(),
        base_path: "/api".to_string(),
    }
}

#[test]
fn test_root_path() {
    let (re, params) = Router::path_to_regex("/").unwrap();
    assert!(re.is_match("/"));
    assert!(params.is_empty());
}

#[test]
fn test_parameterized_path() {
    let (re, params) = Router::path_to_regex("/items/{id}").unwrap();
    assert!(re.is_match("/items/123"));
    assert!(!re.is_match("/items/123/extra"));
    assert_eq!(params.len(), 1);
    assert_eq!(&*params[0], "id");
}

#[test]
fn test_static_segments_are_escaped() {
    let (re, _) = Router::path_to_regex("/files/a.b").unwrap();
    assert!(re.is_match("/files/a.b"));
    assert!(!re.is_match("/files/aXb"));
}

#[test]
fn test_static_beats_param() {
    let router = Router::new(vec![
        route(Method::GET, "/recordings/{id}", "get_recording"),
        route(Method::GET, "/recordings/latest", "latest_recording"),
    ])
    .unwrap();
    let m = router.route(&Method::GET, "/api/recordings/latest").unwrap();
    assert_eq!(m.handler_name(), "latest_recording");
    let m = router.route(&Method::GET, "/api/recordings/7").unwrap();
    assert_eq!(m.handler_name(), "get_recording");
    assert_eq!(m.get_path_param("id"), Some("7"));
}

#[test]
fn test_left_to_right_specificity() {
    let router = Router::new(vec![
        route(Method::GET, "/{kind}/list", "by_kind"),
        route(Method::GET, "/video/{id}", "video"),
    ])
    .unwrap();
    let m = router.route(&Method::GET, "/api/video/list").unwrap();
    assert_eq!(m.handler_name(), "video");
}

#[test]
fn test_method_must_match() {
    let router = Router::new(vec![route(Method::POST, "/encode", "encode")]).unwrap();
    assert!(router.route(&Method::GET, "/api/encode").is_none());
    assert!(router.route(&Method::POST, "/api/encode").is_some());
    assert!(router.route(&Method::POST, "/encode").is_none());
}

#[test]
fn test_params_are_percent_decoded() {
    let router = Router::new(vec![route(Method::GET, "/channels/{name}", "channel")]).unwrap();
    let m = router.route(&Method::GET, "/api/channels/BBC%20One").unwrap();
    assert_eq!(m.get_path_param("name"), Some("BBC One"));
}

#[test]
fn test_ambiguous_routes_rejected() {
    let err = Router::new(vec![
        route(Method::GET, "/recordings/{id}", "a"),
        route(Method::GET, "/recordings/{name}", "b"),
    ])
    .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("ambiguous"));
    assert!(msg.contains("/api/recordings/{id}"));
    assert!(msg.contains("/api/recordings/{name}"));
}

#[test]
fn test_same_shape_different_method_is_fine() {
    let router = Router::new(vec![
        route(Method::GET, "/recordings/{id}", "a"),
        route(Method::DELETE, "/recordings/{id}", "b"),
    ])
    .unwrap();
    assert_eq!(router.len(), 2);
}
