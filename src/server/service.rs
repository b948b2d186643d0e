use super::docs::{self, DEBUG_PATH, VIEWER_PATH};
use super::request::{decode_route_params, RequestHead};
use super::response::{
    write_bytes, write_client_error, write_handler_response, write_redirect,
};
use crate::dispatcher::{Dispatcher, HandlerInputs};
use crate::error::{ClientError, ClientErrorKind, PipelineError};
use crate::middleware::{AccessEntry, AccessLog, BasicAuthGate};
use crate::pipeline::{ContentPipeline, DecodedBody};
use crate::router::{RouteMatch, Router};
use crate::spec::{Contract, RouteMeta};
use crate::static_files::StaticFiles;
use crate::validator::RouteValidator;
use http::Method;
use may_minihttp::{HttpService, Request, Response};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Key of a route in the validator table.
#[must_use]
pub fn route_key(route: &RouteMeta) -> String {
    format!("{} {}", route.method, route.full_path())
}

/// The per-connection request handler.
///
/// Every request goes through the access gate first, then the contract
/// viewer endpoints, then the contract routes and finally the static roots.
#[derive(Clone)]
pub struct AppService {
    pub router: Arc<Router>,
    pub validators: Arc<HashMap<String, RouteValidator>>,
    pub dispatcher: Arc<Dispatcher>,
    pub pipeline: Arc<ContentPipeline>,
    pub statics: Arc<StaticFiles>,
    pub contract: Arc<Contract>,
    pub gate: Option<Arc<BasicAuthGate>>,
    pub access_log: AccessLog,
}

impl AppService {
    /// Compile validators for every route in `router`.
    #[must_use]
    pub fn new(
        router: Arc<Router>,
        dispatcher: Arc<Dispatcher>,
        pipeline: Arc<ContentPipeline>,
        statics: Arc<StaticFiles>,
        contract: Arc<Contract>,
        gate: Option<BasicAuthGate>,
    ) -> Self {
        let validators = router
            .routes()
            .map(|r| (route_key(r), RouteValidator::compile(r)))
            .collect();
        Self {
            router,
            validators: Arc::new(validators),
            dispatcher,
            pipeline,
            statics,
            contract,
            gate: gate.map(Arc::new),
            access_log: AccessLog,
        }
    }

    /// Status written, or `None` when `path` is not a viewer endpoint.
    fn serve_docs(&self, path: &str, res: &mut Response) -> Option<u16> {
        let base = &self.contract.base_path;
        if path == DEBUG_PATH {
            let target = docs::debug_redirect_target(base);
            debug!(location = %target, "Redirecting to contract viewer");
            write_redirect(res, &target);
            Some(302)
        } else if path == VIEWER_PATH || path == format!("{VIEWER_PATH}/") {
            match docs::render_viewer(self.contract.title(), &docs::document_url(base)) {
                Ok(html) => {
                    write_bytes(res, "text/html", html.into_bytes());
                    Some(200)
                }
                Err(e) => {
                    error!(error = %e, "Failed to render contract viewer");
                    Some(reject(res, &ClientError::internal("viewer unavailable")))
                }
            }
        } else if docs::is_document_path(path, base) {
            match docs::document_bytes(&self.contract.document) {
                Ok(bytes) => {
                    write_bytes(res, "application/json", bytes);
                    Some(200)
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize contract document");
                    Some(reject(res, &ClientError::internal("document unavailable")))
                }
            }
        } else {
            None
        }
    }

    /// Validate, decode and dispatch a matched request. Returns the status written.
    fn serve_route(&self, head: RequestHead, route_match: &RouteMatch, req: Request, res: &mut Response) -> u16 {
        let route = &route_match.route;
        let request_id = head.request_id;
        let (path_params, query_params) = decode_route_params(route, route_match, &head.query_params);
        let validator = self.validators.get(&route_key(route));

        if let Some(v) = validator {
            if let Err(e) = v.validate_params(route, &path_params, &query_params, &head.headers, &head.cookies) {
                warn!(
                    request_id = %request_id,
                    handler_name = %route.handler_name,
                    details = ?e.details,
                    "Parameter validation failed"
                );
                drain(req);
                return reject(res, &e);
            }
        }

        let decoded = match self
            .pipeline
            .decode(head.content_type(), route, request_id, req.body())
        {
            Ok(d) => d,
            Err(PipelineError::Client(e)) => {
                warn!(request_id = %request_id, kind = %e.kind, message = %e.message, "Request body rejected");
                return reject(res, &e);
            }
            Err(PipelineError::Resource(e)) => {
                error!(request_id = %request_id, error = %e, "Upload storage failed");
                return reject(res, &ClientError::internal("could not store upload"));
            }
            Err(PipelineError::Transport(e)) => {
                // the client is most likely gone; answer anyway in case it is not
                warn!(request_id = %request_id, error = %e, "Request body incomplete");
                return reject(res, &ClientError::malformed("request body incomplete"));
            }
        };

        if let Some(v) = validator {
            let checked = match &decoded.body {
                DecodedBody::Raw(bytes) => {
                    v.check_media_type(route, decoded.media_type.as_deref(), !bytes.is_empty())
                }
                body => v.validate_body(
                    route,
                    decoded.media_type.as_deref(),
                    body.validation_value(route.upload_field()).as_ref(),
                ),
            };
            if let Err(e) = checked {
                warn!(
                    request_id = %request_id,
                    handler_name = %route.handler_name,
                    details = ?e.details,
                    "Body validation failed"
                );
                return reject(res, &e);
            }
        }

        let body = decoded.body.json();
        let (raw_body, upload) = match decoded.body {
            DecodedBody::Raw(bytes) => (Some(Arc::new(bytes)), None),
            DecodedBody::Upload { ticket, .. } => (None, Some(ticket)),
            _ => (None, None),
        };
        let inputs = HandlerInputs {
            request_id,
            path: head.path,
            path_params,
            query_params,
            headers: head.headers,
            cookies: head.cookies,
            body,
            raw_body,
            upload,
        };

        match self.dispatcher.dispatch(route_match, inputs) {
            Some(hr) => {
                let status = hr.status;
                let declared = route.content_type_for(status);
                write_handler_response(res, hr, declared);
                status
            }
            None => {
                info!(
                    request_id = %request_id,
                    handler_name = %route.handler_name,
                    "No handler bound"
                );
                reject(
                    res,
                    &ClientError::new(
                        ClientErrorKind::NotImplemented,
                        format!("operation '{}' is not implemented", route.handler_name),
                    ),
                )
            }
        }
    }

    fn serve_static(&self, path: &str, res: &mut Response) -> bool {
        let decoded = urlencoding::decode(path).map_or_else(|_| path.to_string(), |p| p.into_owned());
        match self.statics.load(&decoded) {
            Ok((bytes, mime)) => {
                debug!(path = %decoded, content_type = mime, size = bytes.len(), "Static file served");
                write_bytes(res, mime, bytes);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %decoded, error = %e, "Static file unreadable");
                false
            }
        }
    }
}

/// Write a structured client error and return its status.
fn reject(res: &mut Response, err: &ClientError) -> u16 {
    write_client_error(res, err);
    err.status()
}

/// Consume an unread body so the connection stays in sync.
fn drain(req: Request) {
    let mut body = req.body();
    if let Err(e) = io::copy(&mut body, &mut io::sink()) {
        debug!(error = %e, "Failed to drain request body");
    }
}

impl AppService {
    /// Answer one request. Returns the status written and the bound
    /// handler, if a contract route matched.
    fn respond(&self, head: RequestHead, req: Request, res: &mut Response) -> (u16, Option<Arc<str>>) {
        if let Some(gate) = &self.gate {
            if let Err(e) = gate.check(head.header("authorization")) {
                debug!(request_id = %head.request_id, path = %head.path, "Access gate rejected request");
                drain(req);
                let status = reject(res, &e);
                res.header(BasicAuthGate::challenge());
                return (status, None);
            }
        }

        let method = Method::from_bytes(head.method.as_bytes()).ok();
        if method == Some(Method::GET) {
            if let Some(status) = self.serve_docs(&head.path, res) {
                drain(req);
                return (status, None);
            }
        }

        if let Some(method) = &method {
            if let Some(route_match) = self.router.route(method, &head.path) {
                let handler = Arc::clone(&route_match.route.handler_name);
                let status = self.serve_route(head, &route_match, req, res);
                return (status, Some(handler));
            }
        }

        drain(req);
        if method == Some(Method::GET) && self.serve_static(&head.path, res) {
            return (200, None);
        }
        debug!(request_id = %head.request_id, method = %head.method, path = %head.path, "Not found");
        let status = reject(res, &ClientError::not_found(&head.method, &head.path));
        (status, None)
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let start = Instant::now();
        let head = RequestHead::from_request(&req);
        let request_id = head.request_id;
        let method = head.method.clone();
        let path = head.path.clone();

        let (status, handler) = self.respond(head, req, res);

        self.access_log.record(&AccessEntry {
            request_id,
            method: &method,
            path: &path,
            handler: handler.as_deref(),
            status,
            latency: start.elapsed(),
        });
        Ok(())
    }
}
