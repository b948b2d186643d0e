use crate::dispatcher::HandlerResponse;
use crate::error::ClientError;
use may_minihttp::Response;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{error, warn};

/// Distinct header lines kept for the life of the process.
const MAX_INTERNED_HEADERS: usize = 1024;

pub(crate) fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn interned() -> &'static Mutex<HashMap<String, &'static str>> {
    static LINES: OnceLock<Mutex<HashMap<String, &'static str>>> = OnceLock::new();
    LINES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// `may_minihttp` wants `'static` header lines. Each distinct line is
/// allocated once; past [`MAX_INTERNED_HEADERS`] new lines are refused.
pub(crate) fn header_line(name: &str, value: &str) -> Option<&'static str> {
    let line = format!("{name}: {value}");
    let mut lines = interned().lock();
    if let Some(existing) = lines.get(&line) {
        return Some(*existing);
    }
    if lines.len() >= MAX_INTERNED_HEADERS {
        warn!(header = %name, "Header line table full, header dropped");
        return None;
    }
    let leaked: &'static str = Box::leak(line.clone().into_boxed_str());
    lines.insert(line, leaked);
    Some(leaked)
}

fn content_type_line(ct: &str) -> &'static str {
    match ct {
        "application/json" => "Content-Type: application/json",
        "text/plain" => "Content-Type: text/plain",
        "text/html" => "Content-Type: text/html",
        "text/css" => "Content-Type: text/css",
        "application/javascript" => "Content-Type: application/javascript",
        "application/octet-stream" => "Content-Type: application/octet-stream",
        other => header_line("Content-Type", other).unwrap_or("Content-Type: application/octet-stream"),
    }
}

fn status(res: &mut Response, status: u16) {
    res.status_code(usize::from(status), status_reason(status));
}

/// Write a handler's response. Strings go out as `text/plain` unless the
/// handler or the contract picked another content type.
pub fn write_handler_response(res: &mut Response, hr: HandlerResponse, declared: Option<String>) {
    status(res, hr.status);
    let content_type = hr
        .get_header("content-type")
        .map(ToString::to_string)
        .or(declared);
    for (name, value) in &hr.headers {
        if !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("content-length") {
            if let Some(line) = header_line(name, value) {
                res.header(line);
            }
        }
    }
    match hr.body {
        Value::String(s) => {
            let ct = content_type.unwrap_or_else(|| "text/plain".to_string());
            res.header(content_type_line(&ct));
            res.body_vec(s.into_bytes());
        }
        Value::Null if hr.status == 204 => {}
        other => {
            let ct = content_type.unwrap_or_else(|| "application/json".to_string());
            res.header(content_type_line(&ct));
            write_json_body(res, &other);
        }
    }
}

fn write_json_body(res: &mut Response, body: &Value) {
    match serde_json::to_vec(body) {
        Ok(bytes) => res.body_vec(bytes),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            res.body_vec(b"{}".to_vec());
        }
    }
}

/// Write a JSON body with the given status.
pub fn write_json(res: &mut Response, code: u16, body: &Value) {
    status(res, code);
    res.header("Content-Type: application/json");
    write_json_body(res, body);
}

/// Write a structured client error.
pub fn write_client_error(res: &mut Response, err: &ClientError) {
    write_json(res, err.status(), &err.to_body());
}

/// `302` to `location`.
pub fn write_redirect(res: &mut Response, location: &str) {
    status(res, 302);
    match header_line("Location", location) {
        Some(line) => {
            res.header(line);
        }
        None => error!(location = %location, "Redirect location not written"),
    }
    res.body_vec(Vec::new());
}

/// Raw bytes with a content type.
pub fn write_bytes(res: &mut Response, content_type: &str, bytes: Vec<u8>) {
    status(res, 200);
    res.header(content_type_line(content_type));
    res.body_vec(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reason() {
        assert_eq!(status_reason(200), "OK");
        assert_eq!(status_reason(302), "Found");
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(413), "Payload Too Large");
        assert_eq!(status_reason(501), "Not Implemented");
    }

    #[test]
    fn test_header_line_allocated_once() {
        let a = header_line("Content-Type", "video/x-test-once").unwrap();
        let b = header_line("Content-Type", "video/x-test-once").unwrap();
        assert_eq!(a, "Content-Type: video/x-test-once");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_stream_media_types_reuse_lines() {
        let first = content_type_line("video/mpeg");
        for _ in 0..100 {
            assert!(std::ptr::eq(first, content_type_line("video/mpeg")));
        }
    }
}
