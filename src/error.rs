//! Error taxonomy shared by the ingress pipeline.
//!
//! Three families exist and they are handled very differently:
//!
//! - [`ClientError`] - the request itself is wrong (schema mismatch, malformed
//!   body, wrong file field). Rendered to the client as a JSON body with a
//!   stable `{ "kind", "message", "details" }` shape.
//! - [`ResourceError`] - local resources failed (temp directory, file I/O).
//!   Logged with full context; fatal only while starting up.
//! - [`TransportError`] - the peer went away mid-stream. Triggers cleanup and a
//!   log line, never a response (nobody is left to read it).

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Machine-readable category of a client-facing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClientErrorKind {
    /// Parameters or body do not match the declared schema
    Validation,
    /// Body could not be decoded for its declared content type
    MalformedContent,
    /// Multipart request without the declared file field
    MissingFile,
    /// Multipart request with an extra or unexpected file field
    UnexpectedFile,
    /// Body exceeded the configured decoder limit
    PayloadTooLarge,
    /// Body sent with a media type the operation does not declare
    UnsupportedMediaType,
    NotFound,
    Unauthorized,
    /// Operation is declared in the contract but no handler is bound
    NotImplemented,
    /// The server failed while serving an otherwise valid request
    Internal,
}

impl ClientErrorKind {
    #[must_use]
    pub fn status(self) -> u16 {
        match self {
            ClientErrorKind::Validation
            | ClientErrorKind::MalformedContent
            | ClientErrorKind::MissingFile
            | ClientErrorKind::UnexpectedFile => 400,
            ClientErrorKind::Unauthorized => 401,
            ClientErrorKind::NotFound => 404,
            ClientErrorKind::PayloadTooLarge => 413,
            ClientErrorKind::UnsupportedMediaType => 415,
            ClientErrorKind::Internal => 500,
            ClientErrorKind::NotImplemented => 501,
        }
    }
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientErrorKind::Validation => "Validation",
            ClientErrorKind::MalformedContent => "MalformedContent",
            ClientErrorKind::MissingFile => "MissingFile",
            ClientErrorKind::UnexpectedFile => "UnexpectedFile",
            ClientErrorKind::PayloadTooLarge => "PayloadTooLarge",
            ClientErrorKind::UnsupportedMediaType => "UnsupportedMediaType",
            ClientErrorKind::NotFound => "NotFound",
            ClientErrorKind::Unauthorized => "Unauthorized",
            ClientErrorKind::NotImplemented => "NotImplemented",
            ClientErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// Structured client-facing error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn validation(message: impl Into<String>, details: Vec<String>) -> Self {
        Self::new(ClientErrorKind::Validation, message).with_details(details)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::MalformedContent, message)
    }

    #[must_use]
    pub fn not_found(method: &str, path: &str) -> Self {
        Self::new(ClientErrorKind::NotFound, format!("no route for {method} {path}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Internal, message)
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    /// JSON body sent to the client.
    #[must_use]
    pub fn to_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "kind": self.kind.to_string(), "message": self.message })
        })
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if !self.details.is_empty() {
            write!(f, " ({})", self.details.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ClientError {}

/// Failure of a local resource (directories and files on disk).
#[derive(Debug)]
pub enum ResourceError {
    /// The upload temp directory could not be created or is not a directory
    TempDir { path: PathBuf, source: io::Error },
    /// A destination file could not be created
    Create { path: PathBuf, source: io::Error },
    /// Writing streamed bytes failed (disk full, I/O error)
    Write { path: PathBuf, source: io::Error },
    /// Removing an abandoned upload failed
    Delete { path: PathBuf, source: io::Error },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::TempDir { path, source } => {
                write!(f, "upload directory {} unavailable: {source}", path.display())
            }
            ResourceError::Create { path, source } => {
                write!(f, "cannot create upload file {}: {source}", path.display())
            }
            ResourceError::Write { path, source } => {
                write!(f, "cannot write upload file {}: {source}", path.display())
            }
            ResourceError::Delete { path, source } => {
                write!(f, "cannot delete upload file {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::TempDir { source, .. }
            | ResourceError::Create { source, .. }
            | ResourceError::Write { source, .. }
            | ResourceError::Delete { source, .. } => Some(source),
        }
    }
}

/// The peer stopped sending before the body was complete.
#[derive(Debug)]
pub enum TransportError {
    /// Stream ended early; `received` bytes had been consumed
    Truncated { received: u64 },
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Truncated { received } => {
                write!(f, "connection closed after {received} body bytes")
            }
            TransportError::Io(e) => write!(f, "connection error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outcome of a failed body decode.
#[derive(Debug)]
pub enum PipelineError {
    Client(ClientError),
    Resource(ResourceError),
    Transport(TransportError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Client(e) => e.fmt(f),
            PipelineError::Resource(e) => e.fmt(f),
            PipelineError::Transport(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<ClientError> for PipelineError {
    fn from(e: ClientError) -> Self {
        PipelineError::Client(e)
    }
}

impl From<ResourceError> for PipelineError {
    fn from(e: ResourceError) -> Self {
        PipelineError::Resource(e)
    }
}

impl From<TransportError> for PipelineError {
    fn from(e: TransportError) -> Self {
        PipelineError::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_body_shape() {
        let err = ClientError::validation("bad query", vec!["limit: not an integer".into()]);
        let body = err.to_body();
        assert_eq!(body["kind"], "Validation");
        assert_eq!(body["message"], "bad query");
        assert_eq!(body["details"][0], "limit: not an integer");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_details_omitted_when_empty() {
        let body = ClientError::malformed("broken json").to_body();
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_kind_status_mapping() {
        assert_eq!(ClientErrorKind::PayloadTooLarge.status(), 413);
        assert_eq!(ClientErrorKind::NotImplemented.status(), 501);
        assert_eq!(ClientErrorKind::Unauthorized.status(), 401);
    }
}
