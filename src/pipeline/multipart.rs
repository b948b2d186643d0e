//! Streaming `multipart/form-data` decoding.
//!
//! The body is consumed in fixed-size chunks. File bytes go straight to a
//! [`PendingUpload`]; only the small text fields are held in memory.

use crate::error::{ClientError, ClientErrorKind, PipelineError, ResourceError, TransportError};
use crate::ids::RequestId;
use crate::upload::{PendingUpload, UploadStore};
use std::io::{self, Read, Write};

/// Bytes requested from the socket per read.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound for one part's header block.
pub const MAX_PART_HEADER_BYTES: usize = 16 * 1024;

/// Extract the `boundary` parameter of a multipart content type.
#[must_use]
pub fn parse_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        // RFC 2046: 1 to 70 characters
        if value.is_empty() || value.len() > 70 {
            None
        } else {
            Some(value.to_string())
        }
    })
}

/// Limits and ownership for one multipart decode.
#[derive(Debug, Clone, Copy)]
pub struct MultipartContext<'a> {
    pub store: &'a UploadStore,
    pub owner: RequestId,
    /// The single file field the route declares
    pub file_field: &'a str,
    /// Limit for each text field
    pub field_limit: usize,
}

/// The file part of a multipart body, written and closed.
#[derive(Debug)]
pub struct FilePart {
    pub upload: PendingUpload,
    pub original_name: String,
    pub mime_type: String,
}

/// Everything a multipart body contained.
#[derive(Debug)]
pub struct MultipartForm {
    /// Text fields in arrival order, raw strings
    pub fields: Vec<(String, String)>,
    pub file: FilePart,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

fn parse_part_headers(block: &[u8]) -> Result<PartHeaders, ClientError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| ClientError::malformed("multipart part headers are not valid UTF-8"))?;
    let mut headers = PartHeaders::default();
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ClientError::malformed(format!(
                "malformed multipart header line: {line}"
            )));
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                let Some((k, v)) = param.split_once('=') else {
                    continue;
                };
                let v = v.trim().trim_matches('"').to_string();
                match k.trim().to_ascii_lowercase().as_str() {
                    "name" => headers.name = Some(v),
                    "filename" => headers.filename = Some(v),
                    _ => {}
                }
            }
        } else if name.trim().eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.to_string());
        }
    }
    Ok(headers)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Bounded in-memory sink for text fields.
struct CappedBuf {
    buf: Vec<u8>,
    limit: usize,
}

impl Write for CappedBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "field too large"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Sink {
    File(FilePart),
    Field { name: String, buf: CappedBuf },
    Discard,
}

impl Sink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), PipelineError> {
        match self {
            Sink::File(part) => part.upload.write_all(data).map_err(|source| {
                PipelineError::Resource(ResourceError::Write {
                    path: part.upload.path().to_path_buf(),
                    source,
                })
            }),
            Sink::Field { name, buf } => buf.write_all(data).map_err(|_| {
                PipelineError::Client(ClientError::new(
                    ClientErrorKind::PayloadTooLarge,
                    format!("form field '{name}' exceeds {} bytes", buf.limit),
                ))
            }),
            Sink::Discard => Ok(()),
        }
    }
}

struct Stream<R> {
    reader: R,
    buf: Vec<u8>,
    received: u64,
}

impl<R: Read> Stream<R> {
    /// Read one more chunk. `Ok(false)` means the peer sent nothing more.
    fn fill(&mut self) -> Result<bool, TransportError> {
        let start = self.buf.len();
        self.buf.resize(start + CHUNK_SIZE, 0);
        loop {
            match self.reader.read(&mut self.buf[start..]) {
                Ok(n) => {
                    self.buf.truncate(start + n);
                    self.received += n as u64;
                    return Ok(n > 0);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(start);
                    return Err(match e.kind() {
                        io::ErrorKind::UnexpectedEof => TransportError::Truncated {
                            received: self.received,
                        },
                        _ => TransportError::Io(e),
                    });
                }
            }
        }
    }

    fn truncated(&self) -> PipelineError {
        PipelineError::Transport(TransportError::Truncated {
            received: self.received,
        })
    }

    /// Make at least `n` bytes available.
    fn need(&mut self, n: usize) -> Result<(), PipelineError> {
        while self.buf.len() < n {
            if !self.fill()? {
                return Err(self.truncated());
            }
        }
        Ok(())
    }
}

/// Decode a multipart body with exactly one file part.
///
/// # Errors
///
/// - client errors for malformed framing, a missing file part, a second file
///   part or a file under an unexpected field name, and oversized text fields
/// - resource errors when the upload file cannot be created or written
/// - transport errors when the body ends before the closing delimiter
///
/// On any error the partially written upload is dropped, which deletes it.
pub fn read_multipart<R: Read>(
    reader: R,
    boundary: &str,
    ctx: MultipartContext<'_>,
) -> Result<MultipartForm, PipelineError> {
    let mut delimiter = Vec::with_capacity(boundary.len() + 4);
    delimiter.extend_from_slice(b"\r\n--");
    delimiter.extend_from_slice(boundary.as_bytes());
    let keep = delimiter.len() - 1;

    // the first delimiter has no leading CRLF
    let mut stream = Stream {
        reader,
        buf: b"\r\n".to_vec(),
        received: 0,
    };

    let mut fields = Vec::new();
    let mut file: Option<FilePart> = None;
    let mut sink = Sink::Discard;

    loop {
        // body of the current part (or the preamble) up to the next delimiter
        loop {
            if let Some(i) = find(&stream.buf, &delimiter) {
                sink.write_all(&stream.buf[..i])?;
                stream.buf.drain(..i + delimiter.len());
                break;
            }
            let safe = stream.buf.len().saturating_sub(keep);
            if safe > 0 {
                sink.write_all(&stream.buf[..safe])?;
                stream.buf.drain(..safe);
            }
            if !stream.fill()? {
                return Err(stream.truncated());
            }
        }

        match std::mem::replace(&mut sink, Sink::Discard) {
            Sink::File(mut part) => {
                part.upload.finish()?;
                file = Some(part);
            }
            Sink::Field { name, buf } => {
                let value = String::from_utf8(buf.buf).map_err(|_| {
                    ClientError::malformed(format!("form field '{name}' is not valid UTF-8"))
                })?;
                fields.push((name, value));
            }
            Sink::Discard => {}
        }

        stream.need(2)?;
        if stream.buf.starts_with(b"--") {
            break;
        }
        // transport padding before the CRLF is allowed
        while stream.buf.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
            stream.buf.remove(0);
            stream.need(2)?;
        }
        if !stream.buf.starts_with(b"\r\n") {
            return Err(ClientError::malformed("multipart delimiter not followed by CRLF").into());
        }
        stream.buf.drain(..2);

        let headers = loop {
            if stream.buf.starts_with(b"\r\n") {
                stream.buf.drain(..2);
                break PartHeaders::default();
            }
            if let Some(i) = find(&stream.buf, b"\r\n\r\n") {
                let headers = parse_part_headers(&stream.buf[..i])?;
                stream.buf.drain(..i + 4);
                break headers;
            }
            if stream.buf.len() > MAX_PART_HEADER_BYTES {
                return Err(ClientError::malformed("multipart part headers too large").into());
            }
            if !stream.fill()? {
                return Err(stream.truncated());
            }
        };

        let Some(name) = headers.name else {
            return Err(ClientError::malformed("multipart part without a field name").into());
        };

        sink = match headers.filename {
            Some(original_name) => {
                if name != ctx.file_field {
                    return Err(ClientError::new(
                        ClientErrorKind::UnexpectedFile,
                        format!("unexpected file field '{name}', expected '{}'", ctx.file_field),
                    )
                    .into());
                }
                if file.is_some() {
                    return Err(ClientError::new(
                        ClientErrorKind::UnexpectedFile,
                        format!("more than one file in field '{name}'"),
                    )
                    .into());
                }
                let upload = ctx.store.begin(&name, ctx.owner)?;
                Sink::File(FilePart {
                    upload,
                    original_name,
                    mime_type: headers
                        .content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                })
            }
            None => Sink::Field {
                name,
                buf: CappedBuf {
                    buf: Vec::new(),
                    limit: ctx.field_limit,
                },
            },
        };
    }

    match file {
        Some(file) => Ok(MultipartForm { fields, file }),
        None => Err(ClientError::new(
            ClientErrorKind::MissingFile,
            format!("missing file field '{}'", ctx.file_field),
        )
        .into()),
    }
}
