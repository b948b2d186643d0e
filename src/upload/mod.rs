//! # Temp Upload Store
//!
//! Uploaded files are streamed into a single temp directory. Each file is
//! owned by a [`PendingUpload`] guard: unless the guard is completed, dropping
//! it deletes the file. That ties the file's lifetime to the request that
//! created it, so an aborted connection can never leave data behind.
//!
//! Handlers see the upload through an [`UploadTicket`], a shared handle that
//! lets exactly one holder take ownership of the file with
//! [`UploadTicket::complete`].

use crate::error::ResourceError;
use crate::ids::RequestId;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Process-wide sequence appended to upload names.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Attempts before giving up on a name that already exists on disk.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Directory that holds uploads while their request is in flight.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Use `dir` as the upload directory, creating it when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ResourceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ResourceError::TempDir {
            path: dir.clone(),
            source,
        })?;
        if !dir.is_dir() {
            return Err(ResourceError::TempDir {
                source: io::Error::new(io::ErrorKind::Other, "not a directory"),
                path: dir,
            });
        }
        info!(upload_dir = %dir.display(), "Upload store ready");
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh file for `field_name`, owned by `owner`.
    ///
    /// Names are `<field>-<unix millis>-<sequence>` and the file is opened
    /// with `create_new`, so an existing file is never reused.
    pub fn begin(&self, field_name: &str, owner: RequestId) -> Result<PendingUpload, ResourceError> {
        let stem = sanitize(field_name);
        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
            let file_name = format!("{stem}-{millis}-{seq}");
            let path = self.dir.join(&file_name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!(
                        request_id = %owner,
                        field = %field_name,
                        path = %path.display(),
                        "Upload started"
                    );
                    return Ok(PendingUpload {
                        field_name: field_name.to_string(),
                        file_name,
                        path,
                        owner,
                        file: Some(file),
                        size: 0,
                        completed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    last_err = Some(e);
                }
                Err(source) => return Err(ResourceError::Create { path, source }),
            }
        }
        Err(ResourceError::Create {
            path: self.dir.join(stem),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AlreadyExists, "name exhausted")),
        })
    }

    /// Remove regular files older than `max_age`. Returns how many were removed.
    ///
    /// Meant for startup, to clear leftovers of a previous crash.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize, ResourceError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| ResourceError::TempDir {
            path: self.dir.clone(),
            source,
        })?;
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    warn!(error = %ResourceError::Delete { path, source }, "Stale upload not removed");
                }
            }
        }
        if removed > 0 {
            info!(removed = removed, upload_dir = %self.dir.display(), "Removed stale uploads");
        }
        Ok(removed)
    }
}

/// Keep names to a safe character set; the field name comes from the client.
fn sanitize(field_name: &str) -> String {
    let s: String = field_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    if s.is_empty() {
        "upload".to_string()
    } else {
        s
    }
}

/// An upload file being written or waiting for a handler to claim it.
#[derive(Debug)]
pub struct PendingUpload {
    field_name: String,
    file_name: String,
    path: PathBuf,
    owner: RequestId,
    file: Option<File>,
    size: u64,
    completed: bool,
}

impl PendingUpload {
    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn owner(&self) -> RequestId {
        self.owner
    }

    /// Bytes written so far.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush and close the file; the upload stays pending.
    pub fn finish(&mut self) -> Result<(), ResourceError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .and_then(|()| file.sync_data())
                .map_err(|source| ResourceError::Write {
                    path: self.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Take ownership of the file. No later cleanup touches it.
    pub fn complete(mut self) -> Result<PathBuf, ResourceError> {
        self.finish()?;
        self.completed = true;
        info!(
            request_id = %self.owner,
            path = %self.path.display(),
            size = self.size,
            "Upload completed"
        );
        Ok(self.path.clone())
    }
}

impl Write for PendingUpload {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "upload already closed"))?;
        let n = file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        // close before unlinking
        drop(self.file.take());
        match fs::remove_file(&self.path) {
            Ok(()) => info!(
                request_id = %self.owner,
                path = %self.path.display(),
                bytes = self.size,
                "Upload deleted"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => debug!(
                request_id = %self.owner,
                path = %self.path.display(),
                "Upload already gone"
            ),
            Err(source) => warn!(
                request_id = %self.owner,
                error = %ResourceError::Delete { path: self.path.clone(), source },
                "Upload cleanup failed"
            ),
        }
    }
}

/// Descriptor substituted into the request body for the uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    pub fieldname: String,
    pub originalname: String,
    pub mimetype: String,
    pub destination: String,
    pub filename: String,
    pub path: String,
    pub size: u64,
}

impl FileDescriptor {
    #[must_use]
    pub fn new(upload: &PendingUpload, dir: &Path, original_name: &str, mime_type: &str) -> Self {
        Self {
            fieldname: upload.field_name.clone(),
            originalname: original_name.to_string(),
            mimetype: mime_type.to_string(),
            destination: dir.display().to_string(),
            filename: upload.file_name.clone(),
            path: upload.path.display().to_string(),
            size: upload.size,
        }
    }
}

/// Shared handle to a finished upload, handed to the bound handler.
///
/// Clones refer to the same file. When the last clone is dropped without
/// anyone calling [`complete`](Self::complete), the file is deleted.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    inner: Arc<Mutex<Option<PendingUpload>>>,
    descriptor: Arc<FileDescriptor>,
}

impl UploadTicket {
    #[must_use]
    pub fn new(upload: PendingUpload, descriptor: FileDescriptor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(upload))),
            descriptor: Arc::new(descriptor),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Take ownership of the file.
    ///
    /// Returns the path the first time; later calls (from any clone) get `None`.
    pub fn complete(&self) -> Result<Option<PathBuf>, ResourceError> {
        let pending = self.inner.lock().take();
        pending.map(PendingUpload::complete).transpose()
    }

    /// Whether the file is still awaiting a claim.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.lock().is_some()
    }
}
