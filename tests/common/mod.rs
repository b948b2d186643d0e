#![allow(dead_code)]

pub mod temp_files {
    use std::path::PathBuf;

    /// Write `content` into a fresh temp directory; the directory lives as
    /// long as the returned guard.
    pub fn write_temp(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }
}

pub mod test_server {
    use std::net::TcpListener;
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// A port that was free a moment ago.
    pub fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }
}

pub mod http {
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        /// Lowercased names
        pub headers: HashMap<String, String>,
        pub body: Vec<u8>,
    }

    impl RawResponse {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.body).to_string()
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
        }
    }

    pub fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }

    /// Status line and headers; leaves the reader positioned at the body.
    pub fn read_head<R: BufRead>(reader: &mut R) -> (u16, HashMap<String, String>) {
        let mut status_line = String::new();
        reader.read_line(&mut status_line).unwrap();
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("bad status line: {status_line:?}"));
        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((k, v)) = line.split_once(':') {
                headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
            }
        }
        (status, headers)
    }

    /// Read one response framed by `Content-Length`.
    pub fn read_response<R: BufRead>(reader: &mut R) -> RawResponse {
        let (status, headers) = read_head(reader);
        let len: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).unwrap();
        RawResponse {
            status,
            headers,
            body,
        }
    }

    /// Send raw request bytes on a fresh connection and read the response.
    pub fn send_raw(addr: SocketAddr, request: &[u8]) -> RawResponse {
        let mut stream = connect(addr);
        stream.write_all(request).unwrap();
        let mut reader = BufReader::new(stream);
        read_response(&mut reader)
    }

    /// Build and send a request with optional extra header lines and body.
    pub fn send_request(
        addr: SocketAddr,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> RawResponse {
        let mut req = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        for (k, v) in headers {
            req.push_str(&format!("{k}: {v}\r\n"));
        }
        req.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        let mut bytes = req.into_bytes();
        bytes.extend_from_slice(body);
        send_raw(addr, &bytes)
    }

    pub fn get(addr: SocketAddr, path: &str) -> RawResponse {
        send_request(addr, "GET", path, &[], b"")
    }

    pub fn post_json(addr: SocketAddr, path: &str, body: &serde_json::Value) -> RawResponse {
        let bytes = serde_json::to_vec(body).unwrap();
        send_request(addr, "POST", path, &[("Content-Type", "application/json")], &bytes)
    }

    /// Drain until the peer closes; used to check nothing else arrives.
    pub fn read_to_end_lossy(stream: &mut TcpStream) -> String {
        let mut out = Vec::new();
        let _ = stream.read_to_end(&mut out);
        String::from_utf8_lossy(&out).to_string()
    }
}

pub mod multipart {
    pub const BOUNDARY: &str = "----mediagate-test-boundary";

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    /// Headers of a file part, up to where its data starts.
    pub fn file_part_head(field: &str, filename: &str, mime: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
    }

    pub fn text_part(name: &str, value: &str) -> String {
        format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
    }

    pub fn closing() -> String {
        format!("\r\n--{BOUNDARY}--\r\n")
    }

    /// A complete body: text fields, then one file.
    pub fn body(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
        let mut out = Vec::new();
        for (k, v) in fields {
            out.extend_from_slice(text_part(k, v).as_bytes());
        }
        match file {
            Some((field, name, data)) => {
                out.extend_from_slice(file_part_head(field, name, "video/mp2t").as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(closing().as_bytes());
            }
            None => out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes()),
        }
        out
    }
}

pub mod fixture {
    use super::test_server::{free_port, setup_may_runtime};
    use mediagate::config::ServerConfig;
    use mediagate::spec::{load_contract_str, PackageInfo};
    use mediagate::{App, Running};
    use std::net::SocketAddr;
    use std::path::PathBuf;

    pub const CONTRACT: &str = r#"
openapi: 3.0.0
info:
  title: fixture
  version: "0"
servers:
  - url: /api
paths:
  /items:
    post:
      operationId: create_item
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [a]
              properties:
                a: { type: integer }
      responses:
        "201":
          description: created
          content:
            application/json: {}
  /items/{id}:
    get:
      operationId: get_item
      parameters:
        - { name: id, in: path, required: true, schema: { type: integer } }
        - { name: verbose, in: query, required: false, schema: { type: boolean } }
      responses:
        "200": { description: ok }
  /videos:
    post:
      operationId: upload_video
      requestBody:
        required: true
        content:
          multipart/form-data:
            schema:
              type: object
              required: [file]
              properties:
                file: { type: string, format: binary }
                title: { type: string }
                channel: { type: integer }
      responses:
        "200": { description: ok }
  /notes:
    post:
      operationId: add_note
      requestBody:
        content:
          text/plain:
            schema: { type: string }
      responses:
        "200": { description: ok }
  /schedule:
    get:
      operationId: get_schedule
      responses:
        "200": { description: ok }
"#;

    /// A started server over a temp directory tree.
    pub struct TestGate {
        pub tmp: tempfile::TempDir,
        pub running: Option<Running>,
        pub addr: SocketAddr,
        pub event_addr: SocketAddr,
    }

    impl TestGate {
        pub fn upload_dir(&self) -> PathBuf {
            self.tmp.path().join("upload")
        }

        pub fn kept_dir(&self) -> PathBuf {
            self.tmp.path().join("kept")
        }

        pub fn html_dir(&self) -> PathBuf {
            self.tmp.path().join("html")
        }

        pub fn running(&self) -> &Running {
            self.running.as_ref().unwrap()
        }

        /// Files currently in the upload directory.
        pub fn pending_files(&self) -> Vec<PathBuf> {
            std::fs::read_dir(self.upload_dir())
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect()
        }
    }

    impl Drop for TestGate {
        fn drop(&mut self) {
            if let Some(running) = self.running.take() {
                running.stop();
            }
        }
    }

    pub fn config(tmp: &tempfile::TempDir) -> ServerConfig {
        let mut cfg = ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            server_port: free_port(),
            event_port: Some(free_port()),
            upload_temp_dir: tmp.path().join("upload"),
            heartbeat_secs: 3600,
            stale_upload_secs: None,
            ..ServerConfig::default()
        };
        cfg.static_roots.html = tmp.path().join("html");
        cfg.static_roots.stream_files = tmp.path().join("streamfiles");
        cfg
    }

    /// Build, let `bind` register handlers, start.
    pub fn start_with<F>(tweak: impl FnOnce(&mut ServerConfig), bind: F) -> TestGate
    where
        F: FnOnce(&mut App, &std::path::Path),
    {
        setup_may_runtime();
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("html")).unwrap();
        std::fs::create_dir_all(tmp.path().join("streamfiles")).unwrap();
        std::fs::create_dir_all(tmp.path().join("kept")).unwrap();
        let mut cfg = config(&tmp);
        tweak(&mut cfg);
        let contract = load_contract_str(CONTRACT, &PackageInfo::current()).unwrap();
        let mut app = App::build(cfg, contract).unwrap();
        bind(&mut app, tmp.path());
        let running = app.start().unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], running.addr().port()));
        let event_addr = SocketAddr::from(([127, 0, 0, 1], running.event_addr().port()));
        TestGate {
            tmp,
            running: Some(running),
            addr,
            event_addr,
        }
    }
}
