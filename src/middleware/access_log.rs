use std::time::Duration;

use tracing::{info, warn};

use crate::ids::RequestId;

/// What the access log records about one request.
#[derive(Debug, Clone)]
pub struct AccessEntry<'a> {
    pub request_id: RequestId,
    pub method: &'a str,
    pub path: &'a str,
    /// Bound handler when the request matched a contract route
    pub handler: Option<&'a str>,
    pub status: u16,
    pub latency: Duration,
}

/// One log line per request, whatever answered it: the access gate, the
/// viewer endpoints, a contract route or the static roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

impl AccessLog {
    pub fn record(&self, entry: &AccessEntry<'_>) {
        let latency_ms = u64::try_from(entry.latency.as_millis()).unwrap_or(u64::MAX);
        let handler = entry.handler.unwrap_or("-");
        if entry.status >= 500 {
            warn!(
                request_id = %entry.request_id,
                method = %entry.method,
                path = %entry.path,
                handler = %handler,
                status = entry.status,
                latency_ms = latency_ms,
                "Request failed"
            );
        } else {
            info!(
                request_id = %entry.request_id,
                method = %entry.method,
                path = %entry.path,
                handler = %handler,
                status = entry.status,
                latency_ms = latency_ms,
                "Request handled"
            );
        }
    }
}
