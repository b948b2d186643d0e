use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterStyle {
    Matrix,
    Label,
    Form,
    Simple,
    SpaceDelimited,
    PipeDelimited,
    DeepObject,
}

impl From<oas3::spec::ParameterStyle> for ParameterStyle {
    fn from(style: oas3::spec::ParameterStyle) -> Self {
        use oas3::spec::ParameterStyle as PS;
        match style {
            PS::Matrix => ParameterStyle::Matrix,
            PS::Label => ParameterStyle::Label,
            PS::Form => ParameterStyle::Form,
            PS::Simple => ParameterStyle::Simple,
            PS::SpaceDelimited => ParameterStyle::SpaceDelimited,
            PS::PipeDelimited => ParameterStyle::PipeDelimited,
            PS::DeepObject => ParameterStyle::DeepObject,
        }
    }
}

impl std::fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterLocation::Path => write!(f, "path"),
            ParameterLocation::Query => write!(f, "query"),
            ParameterLocation::Header => write!(f, "header"),
            ParameterLocation::Cookie => write!(f, "cookie"),
        }
    }
}

impl From<oas3::spec::ParameterIn> for ParameterLocation {
    fn from(loc: oas3::spec::ParameterIn) -> Self {
        match loc {
            oas3::spec::ParameterIn::Path => ParameterLocation::Path,
            oas3::spec::ParameterIn::Query => ParameterLocation::Query,
            oas3::spec::ParameterIn::Header => ParameterLocation::Header,
            oas3::spec::ParameterIn::Cookie => ParameterLocation::Cookie,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterMeta {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub schema: Option<Value>,
    pub style: Option<ParameterStyle>,
    pub explode: Option<bool>,
}

/// One declared media type of a request body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyContent {
    /// Lowercased media type, e.g. `application/json`
    pub media_type: String,
    /// Fully `$ref`-expanded JSON schema
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodyMeta {
    pub required: bool,
    pub content: Vec<BodyContent>,
    /// Name of the single file field when `multipart/form-data` is declared
    pub upload_field: Option<String>,
}

impl RequestBodyMeta {
    #[must_use]
    pub fn schema_for(&self, media_type: &str) -> Option<&Value> {
        self.content
            .iter()
            .find(|c| c.media_type == media_type)
            .and_then(|c| c.schema.as_ref())
    }

    #[must_use]
    pub fn declares(&self, media_type: &str) -> bool {
        self.content.iter().any(|c| c.media_type == media_type)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSpec {
    pub schema: Option<Value>,
}

pub type Responses = HashMap<u16, HashMap<String, ResponseSpec>>;

/// A declared operation: immutable after the contract is loaded.
#[derive(Debug, Clone)]
pub struct RouteMeta {
    pub method: Method,
    pub path_pattern: Arc<str>,
    pub handler_name: Arc<str>,
    pub parameters: Vec<ParameterMeta>,
    pub request_body: Option<RequestBodyMeta>,
    /// Default success schema (200 `application/json`, else first 2xx)
    pub response_schema: Option<Value>,
    pub responses: Responses,
    /// Path prefix taken from `servers[0].url` (e.g. `/api`)
    pub base_path: String,
}

impl RouteMeta {
    #[must_use]
    pub fn content_type_for(&self, status: u16) -> Option<String> {
        self.responses
            .get(&status)
            .and_then(|m| m.keys().next())
            .cloned()
    }

    /// Pattern including the base path, as matched against request paths.
    #[must_use]
    pub fn full_path(&self) -> String {
        format!("{}{}", self.base_path, self.path_pattern)
    }

    #[must_use]
    pub fn upload_field(&self) -> Option<&str> {
        self.request_body
            .as_ref()
            .and_then(|b| b.upload_field.as_deref())
    }
}
