//! Every request leaves one access line, whichever layer answered it.
//!
//! Lives in its own test binary because it installs a global subscriber.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::fixture::start_with;
use common::http::{get, post_json};
use mediagate::config::BasicAuthConfig;
use serde_json::{json, Value};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture() -> &'static Capture {
    static CAPTURE: OnceLock<Capture> = OnceLock::new();
    CAPTURE.get_or_init(|| {
        let capture = Capture::default();
        let writer = capture.clone();
        tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .init();
        capture
    })
}

/// Access lines logged so far as `(method, path, handler, status)`.
fn access_lines() -> Vec<(String, String, String, u64)> {
    let bytes = capture().0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter(|v| {
            matches!(
                v["fields"]["message"].as_str(),
                Some("Request handled" | "Request failed")
            )
        })
        .map(|v| {
            let f = &v["fields"];
            (
                f["method"].as_str().unwrap_or_default().to_string(),
                f["path"].as_str().unwrap_or_default().to_string(),
                f["handler"].as_str().unwrap_or_default().to_string(),
                f["status"].as_u64().unwrap_or_default(),
            )
        })
        .collect()
}

fn wait_for_line(method: &str, path: &str, status: u64) -> (String, String, String, u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(line) = access_lines()
            .into_iter()
            .find(|(m, p, _, s)| m == method && p == path && *s == status)
        {
            return line;
        }
        assert!(
            Instant::now() < deadline,
            "no access line for {method} {path} {status}: {:?}",
            access_lines()
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_every_layer_is_logged() {
    capture();

    let gate = start_with(|_| {}, |_, _| {});
    std::fs::write(gate.html_dir().join("index.html"), "<h1>ok</h1>").unwrap();

    assert_eq!(get(gate.addr, "/").status, 200);
    assert_eq!(get(gate.addr, "/api/debug").status, 302);
    assert_eq!(get(gate.addr, "/nowhere").status, 404);
    assert_eq!(post_json(gate.addr, "/api/items", &json!({"a": "x"})).status, 400);
    assert_eq!(get(gate.addr, "/api/schedule").status, 501);

    assert_eq!(wait_for_line("GET", "/", 200).2, "-");
    wait_for_line("GET", "/api/debug", 302);
    wait_for_line("GET", "/nowhere", 404);
    assert_eq!(wait_for_line("POST", "/api/items", 400).2, "create_item");
    assert_eq!(wait_for_line("GET", "/api/schedule", 501).2, "get_schedule");

    let locked = start_with(
        |cfg| {
            cfg.basic_auth = Some(BasicAuthConfig {
                user: "admin".into(),
                password: "s3cret".into(),
            });
        },
        |_, _| {},
    );
    assert_eq!(get(locked.addr, "/api/items/7").status, 401);
    assert_eq!(wait_for_line("GET", "/api/items/7", 401).2, "-");
}
