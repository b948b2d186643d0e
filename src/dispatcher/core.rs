use crate::error::ClientError;
use crate::ids::RequestId;
use crate::middleware::Middleware;
use crate::router::RouteMatch;
use crate::upload::UploadTicket;
use http::Method;
use may::coroutine;
use may::sync::mpsc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Request data passed to a handler coroutine.
///
/// Parameters are already decoded to JSON types according to their schema
/// and validated; `body` holds the decoded JSON/text/form body.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub request_id: RequestId,
    pub method: Method,
    /// Request path as received (without query string)
    pub path: String,
    pub handler_name: String,
    pub path_params: Map<String, Value>,
    pub query_params: Map<String, Value>,
    /// Lowercased header names
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Option<Value>,
    /// Undecoded bytes for media types without a decoder
    pub raw_body: Option<Arc<Vec<u8>>>,
    /// Set for multipart requests; call `complete` to keep the file
    pub upload: Option<UploadTicket>,
    /// Channel for sending the response back to the dispatcher
    pub reply_tx: mpsc::Sender<HandlerResponse>,
}

impl HandlerRequest {
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&Value> {
        self.path_params.get(name)
    }

    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&Value> {
        self.query_params.get(name)
    }

    /// Get a header by name (case-insensitive)
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Send the response. A closed channel means the dispatcher gave up on
    /// this request, which is logged and otherwise ignored.
    pub fn respond(&self, response: HandlerResponse) {
        if self.reply_tx.send(response).is_err() {
            warn!(request_id = %self.request_id, handler_name = %self.handler_name, "Reply channel closed");
        }
    }
}

/// Everything the server has decoded for a matched request.
#[derive(Debug, Clone, Default)]
pub struct HandlerInputs {
    pub request_id: RequestId,
    pub path: String,
    pub path_params: Map<String, Value>,
    pub query_params: Map<String, Value>,
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub body: Option<Value>,
    pub raw_body: Option<Arc<Vec<u8>>>,
    pub upload: Option<UploadTicket>,
}

/// Response data sent back from a handler coroutine
#[derive(Debug, Clone, Serialize)]
pub struct HandlerResponse {
    pub status: u16,
    #[serde(skip_serializing)]
    pub headers: Vec<(String, String)>,
    /// JSON body; a string body is written as `text/plain`
    pub body: Value,
}

impl HandlerResponse {
    #[must_use]
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self::new(
            status,
            vec![("content-type".to_string(), "application/json".to_string())],
            body,
        )
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(
            status,
            vec![("content-type".to_string(), "text/plain".to_string())],
            Value::String(body.into()),
        )
    }

    /// Structured client error with its mapped status.
    #[must_use]
    pub fn error(err: &ClientError) -> Self {
        Self::json(err.status(), err.to_body())
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }
}

/// Type alias for a channel sender that dispatches requests to a handler
pub type HandlerSender = mpsc::Sender<HandlerRequest>;

/// Routes requests to registered handler coroutines by handler name.
#[derive(Clone, Default)]
pub struct Dispatcher {
    pub handlers: HashMap<String, HandlerSender>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an already running handler coroutine. An existing binding is
    /// replaced; its coroutine exits once its channel closes.
    pub fn add_sender(&mut self, name: &str, sender: HandlerSender) {
        if self.handlers.insert(name.to_string(), sender).is_some() {
            warn!(handler_name = %name, "Replaced existing handler");
        }
        info!(
            handler_name = %name,
            total_handlers = self.handlers.len(),
            "Handler registered"
        );
    }

    pub fn add_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.middlewares.push(mw);
    }

    #[must_use]
    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Register a handler function under `name`.
    ///
    /// Spawns a coroutine that receives requests over a channel. Panics in
    /// the handler are caught and answered with a `500`.
    ///
    /// # Safety
    ///
    /// Spawns a `may` coroutine. The runtime must be configured (stack size)
    /// before the first call, and the handler must send exactly one
    /// response per request.
    pub unsafe fn register_handler<F>(&mut self, name: &str, handler_fn: F)
    where
        F: Fn(HandlerRequest) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<HandlerRequest>();
        let handler_name_for_logging = name.to_string();
        let stack_size = may::config().get_stack_size();

        // SAFETY: spawning is unsafe in `may` because the coroutine must not
        // borrow from the caller; the closure owns everything it touches.
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .name(format!("handler-{name}"))
                .stack_size(stack_size)
                .spawn(move || {
                    debug!(handler_name = %handler_name_for_logging, "Handler coroutine start");
                    for req in rx.iter() {
                        let reply_tx = req.reply_tx.clone();
                        let request_id = req.request_id;

                        if let Err(panic) =
                            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                handler_fn(req);
                            }))
                        {
                            let panic_message = panic
                                .downcast_ref::<&str>()
                                .map(ToString::to_string)
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            error!(
                                request_id = %request_id,
                                handler_name = %handler_name_for_logging,
                                panic_message = %panic_message,
                                "Handler panicked"
                            );
                            let response = HandlerResponse::error(&ClientError::internal(
                                format!("handler '{handler_name_for_logging}' failed"),
                            ));
                            if reply_tx.send(response).is_err() {
                                debug!(request_id = %request_id, "Nobody waiting for panic reply");
                            }
                        }
                    }
                })
        };

        match spawn_result {
            Ok(_) => self.add_sender(name, tx),
            Err(e) => error!(
                handler_name = %name,
                error = %e,
                stack_size = stack_size,
                "Failed to spawn handler coroutine"
            ),
        }
    }

    /// Send a matched request to its handler and wait for the response.
    ///
    /// Returns `None` when no handler is bound to the route.
    #[must_use]
    pub fn dispatch(&self, route_match: &RouteMatch, inputs: HandlerInputs) -> Option<HandlerResponse> {
        let handler_name = route_match.handler_name();
        let tx = self.handlers.get(handler_name)?;
        let (reply_tx, reply_rx) = mpsc::channel();

        let request = HandlerRequest {
            request_id: inputs.request_id,
            method: route_match.route.method.clone(),
            path: inputs.path,
            handler_name: handler_name.to_string(),
            path_params: inputs.path_params,
            query_params: inputs.query_params,
            headers: inputs.headers,
            cookies: inputs.cookies,
            body: inputs.body,
            raw_body: inputs.raw_body,
            upload: inputs.upload,
            reply_tx,
        };
        let request_id = request.request_id;

        let early = self.middlewares.iter().find_map(|mw| mw.before(&request));
        // what `after` sees; it must not hold the reply sender or the upload,
        // so a handler dropping the request closes the reply channel
        let view = HandlerRequest {
            reply_tx: mpsc::channel::<HandlerResponse>().0,
            upload: None,
            ..request.clone()
        };
        let start = Instant::now();
        let mut resp = match early {
            Some(r) => r,
            None => {
                if let Err(e) = tx.send(request) {
                    error!(
                        request_id = %request_id,
                        handler_name = %handler_name,
                        error = %e,
                        "Failed to send request to handler"
                    );
                    return Some(HandlerResponse::json(
                        503,
                        serde_json::json!({"kind": "Internal", "message": "handler unavailable"}),
                    ));
                }
                // may's mpsc has no recv_timeout; panics are answered by the handler loop
                match reply_rx.recv() {
                    Ok(r) => r,
                    Err(e) => {
                        error!(
                            request_id = %request_id,
                            handler_name = %handler_name,
                            error = %e,
                            "Handler dropped the request without replying"
                        );
                        HandlerResponse::error(&ClientError::internal(format!(
                            "handler '{handler_name}' did not respond"
                        )))
                    }
                }
            }
        };
        let latency: Duration = start.elapsed();

        for mw in &self.middlewares {
            mw.after(&view, &mut resp, latency);
        }
        Some(resp)
    }
}
