//! Contract viewer endpoints: a Swagger UI page and the machine-readable
//! contract document it loads.

use minijinja::{context, Environment};
use serde_json::Value;

/// Where the viewer page is served.
pub const VIEWER_PATH: &str = "/api-docs";
/// Machine-readable contract document.
pub const DOCUMENT_PATH: &str = "/docs";
/// Shortcut redirecting to the viewer preloaded with the API document.
pub const DEBUG_PATH: &str = "/api/debug";

const SWAGGER_UI_VERSION: &str = "5.17.14";

const VIEWER_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>{{ title }}</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@{{ version }}/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@{{ version }}/swagger-ui-bundle.js"></script>
  <script>
    const params = new URLSearchParams(window.location.search);
    window.ui = SwaggerUIBundle({
      url: params.get("url") || "{{ spec_url }}",
      dom_id: "#swagger-ui",
    });
  </script>
</body>
</html>
"#;

/// Redirect target for [`DEBUG_PATH`].
#[must_use]
pub fn debug_redirect_target(base_path: &str) -> String {
    format!("{VIEWER_PATH}/?url={}", document_url(base_path))
}

/// URL of the machine document under the contract's base path.
#[must_use]
pub fn document_url(base_path: &str) -> String {
    if base_path.is_empty() || base_path == "/" {
        DOCUMENT_PATH.to_string()
    } else {
        format!("{}{DOCUMENT_PATH}", base_path.trim_end_matches('/'))
    }
}

/// Whether `path` is one of the paths serving the machine document.
#[must_use]
pub fn is_document_path(path: &str, base_path: &str) -> bool {
    path == DOCUMENT_PATH || path == document_url(base_path)
}

/// Render the Swagger UI page.
pub fn render_viewer(title: &str, spec_url: &str) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("viewer", VIEWER_TEMPLATE)?;
    env.get_template("viewer")?.render(context! {
        title => title,
        version => SWAGGER_UI_VERSION,
        spec_url => spec_url,
    })
}

/// Serialized contract document.
pub fn document_bytes(document: &Value) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec_pretty(document)
}
