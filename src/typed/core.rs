use crate::dispatcher::{Dispatcher, HandlerRequest, HandlerResponse};
use crate::error::ClientError;
use crate::ids::RequestId;
use crate::upload::UploadTicket;
use http::Method;
use may::sync::mpsc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::convert::TryFrom;
use tracing::{error, warn};

/// Trait implemented by typed coroutine handlers.
///
/// A handler receives a [`TypedHandlerRequest`] and returns a typed response,
/// serialized as a `200` JSON body. Returning a [`ClientError`] answers with
/// the error's status and structured body.
pub trait Handler: Send + 'static {
    /// The typed request type (converted from HandlerRequest)
    type Request: TryFrom<HandlerRequest, Error = anyhow::Error> + Send + 'static;
    type Response: Serialize + Send + 'static;

    fn handle(&self, req: TypedHandlerRequest<Self::Request>) -> Result<Self::Response, ClientError>;
}

/// Typed request data passed to a [`Handler`].
#[derive(Debug, Clone)]
pub struct TypedHandlerRequest<T> {
    pub request_id: RequestId,
    pub method: Method,
    pub path: String,
    pub handler_name: String,
    pub path_params: Map<String, Value>,
    pub query_params: Map<String, Value>,
    /// The uploaded file, for multipart operations
    pub upload: Option<UploadTicket>,
    pub data: T,
}

impl<T> TypedHandlerRequest<T>
where
    T: TryFrom<HandlerRequest, Error = anyhow::Error>,
{
    /// Convert a generic request, keeping its metadata.
    pub fn from_handler(req: HandlerRequest) -> anyhow::Result<Self> {
        let data = T::try_from(req.clone())?;
        Ok(Self {
            request_id: req.request_id,
            method: req.method,
            path: req.path,
            handler_name: req.handler_name,
            path_params: req.path_params,
            query_params: req.query_params,
            upload: req.upload,
            data,
        })
    }
}

/// One JSON object holding path, query and body fields.
///
/// Body fields win over query fields, which win over path fields. A
/// non-object body is stored under `body`.
#[must_use]
pub fn merged_data(req: &HandlerRequest) -> Value {
    let mut data = req.path_params.clone();
    data.extend(req.query_params.clone());
    match &req.body {
        Some(Value::Object(fields)) => data.extend(fields.clone()),
        Some(other) => {
            data.insert("body".to_string(), other.clone());
        }
        None => {}
    }
    Value::Object(data)
}

/// Deserialize a request type from [`merged_data`].
///
/// Handy as the body of a `TryFrom<HandlerRequest>` impl.
pub fn from_request<T: DeserializeOwned>(req: &HandlerRequest) -> anyhow::Result<T> {
    Ok(serde_json::from_value(merged_data(req))?)
}

fn run_typed<H: Handler>(handler: &H, req: HandlerRequest) -> HandlerResponse {
    let request_id = req.request_id;
    let typed_req = match TypedHandlerRequest::<H::Request>::from_handler(req) {
        Ok(r) => r,
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "Request data rejected by typed handler");
            return HandlerResponse::error(&ClientError::validation(
                "invalid request data",
                vec![err.to_string()],
            ));
        }
    };
    match handler.handle(typed_req) {
        Ok(out) => match serde_json::to_value(out) {
            Ok(body) => HandlerResponse::json(200, body),
            Err(err) => {
                error!(request_id = %request_id, error = %err, "Failed to serialize response");
                HandlerResponse::error(&ClientError::internal("failed to serialize response"))
            }
        },
        Err(client_err) => HandlerResponse::error(&client_err),
    }
}

/// Spawn a typed handler coroutine and return a sender to communicate with it.
///
/// # Safety
///
/// Spawns a `may` coroutine; the runtime must be configured before the call.
pub unsafe fn spawn_typed<H>(handler: H) -> std::io::Result<mpsc::Sender<HandlerRequest>>
where
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<HandlerRequest>();

    // SAFETY: the coroutine owns the handler and the receiver.
    unsafe {
        may::coroutine::Builder::new()
            .stack_size(may::config().get_stack_size())
            .spawn(move || {
                let handler = handler;
                for req in rx.iter() {
                    let reply_tx = req.reply_tx.clone();
                    let handler_name = req.handler_name.clone();
                    let request_id = req.request_id;

                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        run_typed(&handler, req)
                    }));
                    let response = result.unwrap_or_else(|_| {
                        error!(request_id = %request_id, handler_name = %handler_name, "Handler panicked");
                        HandlerResponse::error(&ClientError::internal(format!(
                            "handler '{handler_name}' failed"
                        )))
                    });
                    if reply_tx.send(response).is_err() {
                        warn!(request_id = %request_id, "Reply channel closed");
                    }
                }
            })?;
    }

    Ok(tx)
}

impl Dispatcher {
    /// Register a typed handler that converts [`HandlerRequest`] into the
    /// handler's associated request type using `TryFrom`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`spawn_typed`].
    pub unsafe fn register_typed<H>(&mut self, name: &str, handler: H)
    where
        H: Handler,
    {
        // SAFETY: forwarded to the caller.
        match unsafe { spawn_typed(handler) } {
            Ok(tx) => self.add_sender(name, tx),
            Err(e) => error!(handler_name = %name, error = %e, "Failed to spawn typed handler"),
        }
    }
}
