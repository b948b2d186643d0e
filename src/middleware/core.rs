use std::time::Duration;

use crate::dispatcher::{HandlerRequest, HandlerResponse};

/// Hook run around every dispatched handler call.
pub trait Middleware: Send + Sync {
    /// Return a response to answer without calling the handler.
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        None
    }
    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {}
}
