//! # Static Files
//!
//! Serves the web client and media segments from a set of directories, each
//! mounted under its own URL prefix. The longest matching prefix wins, so
//! `/js/app.js` is looked up in the client bundle directory and not under
//! the html root mounted at `/`.
//!
//! Paths are mapped component by component; anything that is not a normal
//! path component (`..`, a root, a drive prefix) rejects the request.

use crate::config::StaticRoots;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Media types that differ from, or are missing in, the default table.
///
/// `js`, `map`, `jpg`, `ttf` and `woff2` use registered types rather than
/// the legacy ones some clients were served before.
const MIME_OVERRIDES: &[(&str, &str)] = &[
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("eot", "application/vnd.ms-fontobject"),
    ("ttf", "application/x-font-ttf"),
    ("woff", "application/font-woff"),
    ("woff2", "font/woff2"),
    ("map", "application/json"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("ts", "video/mpeg"),
    ("m4s", "application/octet-stream"),
    ("m3u8", "video/MP2T"),
];

const MIME_DEFAULTS: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("svg", "image/svg+xml"),
    ("gif", "image/gif"),
    ("jpeg", "image/jpeg"),
    ("ico", "image/x-icon"),
    ("webp", "image/webp"),
    ("mp4", "video/mp4"),
    ("mpd", "application/dash+xml"),
    ("xml", "application/xml"),
    ("yml", "text/yaml"),
    ("yaml", "text/yaml"),
];

/// Media type for a file by extension; unknown types are octet streams.
#[must_use]
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    MIME_OVERRIDES
        .iter()
        .chain(MIME_DEFAULTS)
        .find(|(e, _)| *e == ext)
        .map_or("application/octet-stream", |(_, mime)| mime)
}

/// A directory served under a URL prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMount {
    prefix: String,
    dir: PathBuf,
}

impl StaticMount {
    #[must_use]
    pub fn new(prefix: &str, dir: impl Into<PathBuf>) -> Self {
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.is_empty() {
            "/".to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        Self {
            prefix,
            dir: dir.into(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Remainder of `url_path` below this mount, if it belongs here.
    fn strip<'a>(&self, url_path: &'a str) -> Option<&'a str> {
        if self.prefix == "/" {
            return Some(url_path);
        }
        let rest = url_path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}

/// Prefix-mounted static directories.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    mounts: Vec<StaticMount>,
}

impl StaticFiles {
    #[must_use]
    pub fn new(mounts: Vec<StaticMount>) -> Self {
        let mut mounts = mounts;
        // longest prefix first
        mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { mounts }
    }

    /// The fixed prefixes of the recorder's web client.
    #[must_use]
    pub fn from_roots(roots: &StaticRoots) -> Self {
        let mut mounts = vec![
            StaticMount::new("/", &roots.html),
            StaticMount::new("/js", &roots.client),
            StaticMount::new("/css", &roots.css),
            StaticMount::new("/img", &roots.img),
            StaticMount::new("/icon", &roots.icon),
            StaticMount::new("/thumbnail", &roots.thumbnail),
            StaticMount::new("/streamfiles", &roots.stream_files),
        ];
        mounts.extend(
            roots
                .vendor
                .iter()
                .map(|v| StaticMount::new(&v.prefix, &v.dir)),
        );
        Self::new(mounts)
    }

    #[must_use]
    pub fn mounts(&self) -> &[StaticMount] {
        &self.mounts
    }

    fn map_path(dir: &Path, rest: &str) -> Option<PathBuf> {
        let mut pb = dir.to_path_buf();
        for comp in Path::new(rest.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => {
                    // a backslash would be a separator on some platforms
                    if s.to_str().is_some_and(|s| s.contains('\\')) {
                        return None;
                    }
                    pb.push(s);
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    /// File backing `url_path` (percent-decoded, without query string).
    ///
    /// Directories resolve to their `index.html`. `None` when no mount
    /// holds the file or the path tries to escape its mount.
    #[must_use]
    pub fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        if url_path.split('/').any(|seg| seg == "..") {
            debug!(path = %url_path, "Static path traversal rejected");
            return None;
        }
        let mount = self.mounts.iter().find(|m| m.strip(url_path).is_some())?;
        let rest = mount.strip(url_path)?;
        let mut path = Self::map_path(&mount.dir, rest)?;
        if path.is_dir() {
            path.push("index.html");
        }
        path.is_file().then_some(path)
    }

    /// Read the file behind `url_path` with its media type.
    pub fn load(&self, url_path: &str) -> io::Result<(Vec<u8>, &'static str)> {
        let path = self
            .resolve(url_path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))?;
        let bytes = fs::read(&path)?;
        Ok((bytes, mime_for(&path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, StaticFiles) {
        let tmp = tempfile::tempdir().unwrap();
        let html = tmp.path().join("html");
        let js = tmp.path().join("js");
        fs::create_dir_all(&html).unwrap();
        fs::create_dir_all(&js).unwrap();
        fs::write(html.join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(html.join("hello.txt"), "Hello\n").unwrap();
        fs::write(js.join("app.js"), "console.log('bundled');\n").unwrap();
        fs::write(tmp.path().join("secret.txt"), "nope").unwrap();
        let sf = StaticFiles::new(vec![
            StaticMount::new("/", &html),
            StaticMount::new("/js/", &js),
        ]);
        (tmp, sf)
    }

    #[test]
    fn test_longest_prefix_wins() {
        let (_tmp, sf) = fixture();
        assert_eq!(sf.mounts()[0].prefix(), "/js");
        let (bytes, ct) = sf.load("/js/app.js").unwrap();
        assert_eq!(ct, "application/javascript");
        assert_eq!(bytes, b"console.log('bundled');\n");
        assert!(sf.load("/app.js").is_err());
    }

    #[test]
    fn test_prefix_needs_segment_boundary() {
        let (_tmp, sf) = fixture();
        // `/jsx` belongs to the root mount, not `/js`
        assert!(sf.resolve("/jsx/app.js").is_none());
    }

    #[test]
    fn test_directory_serves_index() {
        let (_tmp, sf) = fixture();
        let (bytes, ct) = sf.load("/").unwrap();
        assert_eq!(ct, "text/html");
        assert_eq!(bytes, b"<h1>home</h1>");
    }

    #[test]
    fn test_traversal_prevented() {
        let (_tmp, sf) = fixture();
        assert!(sf.resolve("/../secret.txt").is_none());
        assert!(sf.resolve("/js/../../secret.txt").is_none());
        assert!(sf.resolve("/..\\secret.txt").is_none());
        assert!(sf.resolve("/hello.txt").is_some());
    }

    #[test]
    fn test_mime_overrides() {
        assert_eq!(mime_for(Path::new("seg.ts")), "video/mpeg");
        assert_eq!(mime_for(Path::new("list.M3U8")), "video/MP2T");
        assert_eq!(mime_for(Path::new("init.m4s")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("app.js.map")), "application/json");
        assert_eq!(mime_for(Path::new("font.woff2")), "font/woff2");
        assert_eq!(mime_for(Path::new("bundle.min.js")), "application/javascript");
        assert_eq!(mime_for(Path::new("thumb.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("logo.png")), "image/png");
        assert_eq!(mime_for(Path::new("icons.ttf")), "application/x-font-ttf");
        assert_eq!(mime_for(Path::new("icons.eot")), "application/vnd.ms-fontobject");
        assert_eq!(mime_for(Path::new("index.html")), "text/html");
        assert_eq!(mime_for(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_from_roots_mounts_vendor_dirs() {
        let sf = StaticFiles::from_roots(&StaticRoots::default());
        let prefixes: Vec<&str> = sf.mounts().iter().map(StaticMount::prefix).collect();
        assert!(prefixes.contains(&"/material-design-lite"));
        assert!(prefixes.contains(&"/streamfiles"));
        assert_eq!(prefixes.last(), Some(&"/"));
    }
}
