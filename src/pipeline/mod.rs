//! # Content Pipeline
//!
//! Picks a body decoder from the request's media type and runs it before the
//! handler sees the request.
//!
//! | media type | decoder | result |
//! |------------|---------|--------|
//! | `application/json` | [`Decoder::Json`] | JSON value |
//! | `text/text`, `text/plain` | [`Decoder::Text`] | string |
//! | `multipart/form-data` | [`Decoder::Multipart`] | form fields plus an upload |
//! | anything else | passthrough | raw bytes |
//!
//! Media type parameters (`charset`, ...) are ignored for the lookup and the
//! comparison is case-insensitive.

pub mod multipart;

use crate::error::{ClientError, ClientErrorKind, PipelineError, TransportError};
use crate::ids::RequestId;
use crate::server::decode_param_value;
use crate::spec::RouteMeta;
use crate::upload::{FileDescriptor, UploadStore, UploadTicket};
use multipart::{parse_boundary, read_multipart, MultipartContext};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::{self, Read};
use tracing::{debug, info};

/// Body decoders known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    Json,
    Text,
    Multipart,
}

/// Size limits for in-memory decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub json: usize,
    pub text: usize,
    /// Each text field of a multipart body
    pub field: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            json: 1024 * 1024,
            text: 1024 * 1024,
            field: 64 * 1024,
        }
    }
}

/// A decoded request body.
#[derive(Debug, Clone)]
pub enum DecodedBody {
    Empty,
    Json(Value),
    Text(String),
    /// Multipart form: text fields plus the file descriptor under its field name
    Upload { body: Value, ticket: UploadTicket },
    /// Passthrough for media types without a decoder
    Raw(Vec<u8>),
}

impl DecodedBody {
    /// The JSON view handed to the handler as `body`.
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        match self {
            DecodedBody::Json(v) | DecodedBody::Upload { body: v, .. } => Some(v.clone()),
            DecodedBody::Text(s) => Some(Value::String(s.clone())),
            DecodedBody::Empty | DecodedBody::Raw(_) => None,
        }
    }

    /// The value checked against the body schema.
    ///
    /// The file field of an upload is replaced by its original file name, as
    /// schemas declare it as a binary string.
    #[must_use]
    pub fn validation_value(&self, file_field: Option<&str>) -> Option<Value> {
        match (self, file_field) {
            (DecodedBody::Upload { body, ticket }, Some(field)) => {
                let mut view = body.clone();
                if let Value::Object(map) = &mut view {
                    map.insert(
                        field.to_string(),
                        Value::String(ticket.descriptor().originalname.clone()),
                    );
                }
                Some(view)
            }
            _ => self.json(),
        }
    }
}

/// Decoded body together with the media type it was decoded as.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub media_type: Option<String>,
    pub body: DecodedBody,
}

/// Lowercased media type without parameters.
#[must_use]
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Content-type dispatch table plus the upload store it feeds.
#[derive(Debug, Clone)]
pub struct ContentPipeline {
    decoders: HashMap<&'static str, Decoder>,
    uploads: UploadStore,
    limits: Limits,
}

impl ContentPipeline {
    #[must_use]
    pub fn new(uploads: UploadStore, limits: Limits) -> Self {
        let decoders = HashMap::from([
            ("application/json", Decoder::Json),
            ("text/text", Decoder::Text),
            ("text/plain", Decoder::Text),
            ("multipart/form-data", Decoder::Multipart),
        ]);
        Self {
            decoders,
            uploads,
            limits,
        }
    }

    #[must_use]
    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    /// Decoder registered for a media type, if any.
    #[must_use]
    pub fn decoder_for(&self, media_type: &str) -> Option<Decoder> {
        self.decoders.get(media_type).copied()
    }

    /// Decode `body` according to `content_type`.
    ///
    /// Multipart bodies are only decoded for routes that declare an upload
    /// field; anywhere else they pass through untouched. On a client error
    /// the rest of the body is drained so the connection stays usable.
    pub fn decode<R: Read>(
        &self,
        content_type: Option<&str>,
        route: &RouteMeta,
        owner: RequestId,
        mut body: R,
    ) -> Result<Decoded, PipelineError> {
        let media = content_type.map(media_type).filter(|m| !m.is_empty());
        let decoder = media.as_deref().and_then(|m| self.decoder_for(m));

        let result = match decoder {
            Some(Decoder::Json) => read_limited(&mut body, self.limits.json).and_then(decode_json),
            Some(Decoder::Text) => read_limited(&mut body, self.limits.text).and_then(decode_text),
            Some(Decoder::Multipart) => match route.upload_field() {
                Some(field) => self.decode_multipart(&mut body, content_type, field, route, owner),
                None => read_all(&mut body).map(DecodedBody::Raw),
            },
            None => read_all(&mut body).map(|bytes| {
                if bytes.is_empty() {
                    DecodedBody::Empty
                } else {
                    DecodedBody::Raw(bytes)
                }
            }),
        };

        if let Err(PipelineError::Client(e)) = &result {
            debug!(request_id = %owner, kind = %e.kind, "Draining body after decode failure");
            // best effort; the client error is what gets reported
            let _drained = io::copy(&mut body, &mut io::sink());
        }

        result.map(|body| Decoded {
            media_type: media,
            body,
        })
    }

    fn decode_multipart<R: Read>(
        &self,
        body: &mut R,
        content_type: Option<&str>,
        field: &str,
        route: &RouteMeta,
        owner: RequestId,
    ) -> Result<DecodedBody, PipelineError> {
        let boundary = content_type
            .and_then(parse_boundary)
            .ok_or_else(|| ClientError::malformed("multipart body without a boundary"))?;
        let form = read_multipart(
            body,
            &boundary,
            MultipartContext {
                store: &self.uploads,
                owner,
                file_field: field,
                field_limit: self.limits.field,
            },
        )?;

        let schema = route
            .request_body
            .as_ref()
            .and_then(|b| b.schema_for("multipart/form-data"));
        let mut map = Map::new();
        for (name, raw) in form.fields {
            let prop = schema.and_then(|s| s.get("properties")).and_then(|p| p.get(&name));
            map.insert(name, decode_param_value(&raw, prop, None, None));
        }

        let descriptor = FileDescriptor::new(
            &form.file.upload,
            self.uploads.dir(),
            &form.file.original_name,
            &form.file.mime_type,
        );
        map.insert(
            field.to_string(),
            serde_json::to_value(&descriptor).unwrap_or(Value::Null),
        );
        info!(
            request_id = %owner,
            field = %field,
            filename = %descriptor.filename,
            originalname = %descriptor.originalname,
            size = descriptor.size,
            "Upload received"
        );
        Ok(DecodedBody::Upload {
            body: Value::Object(map),
            ticket: UploadTicket::new(form.file.upload, descriptor),
        })
    }
}

fn read_all<R: Read>(body: &mut R) -> Result<Vec<u8>, PipelineError> {
    let mut bytes = Vec::new();
    body.read_to_end(&mut bytes)
        .map_err(|e| PipelineError::Transport(TransportError::Io(e)))?;
    Ok(bytes)
}

/// Read at most `limit` bytes; one more means the body is too large.
fn read_limited<R: Read>(body: &mut R, limit: usize) -> Result<Vec<u8>, PipelineError> {
    let mut bytes = Vec::new();
    body.take(limit as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::Transport(TransportError::Io(e)))?;
    if bytes.len() > limit {
        return Err(ClientError::new(
            ClientErrorKind::PayloadTooLarge,
            format!("body exceeds {limit} bytes"),
        )
        .into());
    }
    Ok(bytes)
}

fn decode_json(bytes: Vec<u8>) -> Result<DecodedBody, PipelineError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(DecodedBody::Empty);
    }
    serde_json::from_slice(&bytes)
        .map(DecodedBody::Json)
        .map_err(|e| ClientError::malformed(format!("invalid JSON body: {e}")).into())
}

fn decode_text(bytes: Vec<u8>) -> Result<DecodedBody, PipelineError> {
    if bytes.is_empty() {
        return Ok(DecodedBody::Empty);
    }
    String::from_utf8(bytes)
        .map(DecodedBody::Text)
        .map_err(|_| ClientError::malformed("text body is not valid UTF-8").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_type_normalized() {
        assert_eq!(media_type("Application/JSON; charset=utf-8"), "application/json");
        assert_eq!(media_type("text/plain"), "text/plain");
        assert_eq!(media_type(""), "");
    }

    #[test]
    fn test_decode_json() {
        match decode_json(b"{\"a\":1}".to_vec()).unwrap() {
            DecodedBody::Json(v) => assert_eq!(v, json!({"a": 1})),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(decode_json(b"  ".to_vec()).unwrap(), DecodedBody::Empty));
        assert!(matches!(
            decode_json(b"{oops".to_vec()),
            Err(PipelineError::Client(ClientError {
                kind: ClientErrorKind::MalformedContent,
                ..
            }))
        ));
    }

    #[test]
    fn test_decode_text_rejects_invalid_utf8() {
        assert!(decode_text(vec![0xff, 0xfe]).is_err());
        assert!(matches!(
            decode_text(b"hello".to_vec()).unwrap(),
            DecodedBody::Text(s) if s == "hello"
        ));
    }

    #[test]
    fn test_read_limited() {
        let mut small: &[u8] = b"1234";
        assert_eq!(read_limited(&mut small, 4).unwrap(), b"1234");
        let mut big: &[u8] = b"12345";
        assert!(matches!(
            read_limited(&mut big, 4),
            Err(PipelineError::Client(ClientError {
                kind: ClientErrorKind::PayloadTooLarge,
                ..
            }))
        ));
    }
}
