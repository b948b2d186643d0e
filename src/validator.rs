//! Contract and request validation.
//!
//! Load-time problems with the contract are collected as [`ValidationIssue`]s
//! and reported together. Request-time validation runs precompiled JSON
//! schema validators against decoded parameters and bodies.

use crate::error::{ClientError, ClientErrorKind};
use crate::spec::{ParameterLocation, RequestBodyMeta, RouteMeta};
use jsonschema::Validator;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub location: String,
    pub kind: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(
        location: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ValidationIssue {
            location: location.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.location, self.message)
    }
}

/// Fail with every issue listed when any were collected.
pub fn fail_if_issues(issues: Vec<ValidationIssue>) -> anyhow::Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    let listing = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    anyhow::bail!(
        "contract validation failed, {} issue(s) found:\n{listing}",
        issues.len()
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SchemaKey {
    Param(ParameterLocation, String),
    Body(String),
}

/// Precompiled validators for one route.
#[derive(Clone, Default)]
pub struct RouteValidator {
    validators: HashMap<SchemaKey, Arc<Validator>>,
}

impl fmt::Debug for RouteValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteValidator")
            .field("schemas", &self.validators.len())
            .finish()
    }
}

fn compile(handler: &str, what: &str, schema: &Value) -> Option<Arc<Validator>> {
    match jsonschema::validator_for(schema) {
        Ok(v) => Some(Arc::new(v)),
        Err(e) => {
            warn!(handler = %handler, schema = %what, error = %e, "Schema does not compile, skipping validation");
            None
        }
    }
}

fn collect_errors(validator: &Validator, value: &Value, prefix: &str, out: &mut Vec<String>) {
    for e in validator.iter_errors(value) {
        out.push(format!("{prefix}: {e}"));
    }
}

impl RouteValidator {
    /// Compile every parameter and body schema declared by `route`.
    #[must_use]
    pub fn compile(route: &RouteMeta) -> Self {
        let mut validators = HashMap::new();
        for param in &route.parameters {
            if let Some(schema) = &param.schema {
                if let Some(v) = compile(&route.handler_name, &param.name, schema) {
                    validators.insert(SchemaKey::Param(param.location, param.name.clone()), v);
                }
            }
        }
        if let Some(body) = &route.request_body {
            for content in &body.content {
                let Some(schema) = &content.schema else {
                    continue;
                };
                if let Some(v) = compile(&route.handler_name, &content.media_type, schema) {
                    validators.insert(SchemaKey::Body(content.media_type.clone()), v);
                }
            }
        }
        debug!(
            handler = %route.handler_name,
            compiled = validators.len(),
            "Compiled request validators"
        );
        Self { validators }
    }

    /// Check required parameters and schema conformance of every supplied one.
    pub fn validate_params(
        &self,
        route: &RouteMeta,
        path: &Map<String, Value>,
        query: &Map<String, Value>,
        headers: &HashMap<String, String>,
        cookies: &HashMap<String, String>,
    ) -> Result<(), ClientError> {
        let mut details = Vec::new();
        for param in &route.parameters {
            let value = match param.location {
                ParameterLocation::Path => path.get(&param.name).cloned(),
                ParameterLocation::Query => query.get(&param.name).cloned(),
                ParameterLocation::Header => headers
                    .get(&param.name.to_ascii_lowercase())
                    .map(|s| crate::server::decode_param_value(s, param.schema.as_ref(), param.style, param.explode)),
                ParameterLocation::Cookie => cookies
                    .get(&param.name)
                    .map(|s| crate::server::decode_param_value(s, param.schema.as_ref(), param.style, param.explode)),
            };
            let Some(value) = value else {
                if param.required {
                    details.push(format!(
                        "{} parameter '{}' is required",
                        param.location, param.name
                    ));
                }
                continue;
            };
            if let Some(v) = self
                .validators
                .get(&SchemaKey::Param(param.location, param.name.clone()))
            {
                collect_errors(v, &value, &format!("{} '{}'", param.location, param.name), &mut details);
            }
        }
        if details.is_empty() {
            Ok(())
        } else {
            Err(ClientError::validation("invalid request parameters", details))
        }
    }

    /// Check that a body is present when required and was sent with a
    /// media type the route declares. `present` is false for an empty body.
    pub fn check_media_type(
        &self,
        route: &RouteMeta,
        media_type: Option<&str>,
        present: bool,
    ) -> Result<(), ClientError> {
        let Some(meta) = &route.request_body else {
            return Ok(());
        };
        if !present {
            if meta.required {
                return Err(ClientError::validation("request body is required", Vec::new()));
            }
            return Ok(());
        }
        if media_type.and_then(|mt| declared_media_type(meta, mt)).is_some() {
            return Ok(());
        }
        let accepted = meta.content.iter().map(|c| c.media_type.clone()).collect();
        let message = match media_type {
            Some(mt) => format!("media type '{mt}' is not accepted by '{}'", route.handler_name),
            None => "request body has no content type".to_string(),
        };
        Err(ClientError::new(ClientErrorKind::UnsupportedMediaType, message).with_details(accepted))
    }

    /// Validate a decoded body against the schema of its media type.
    ///
    /// A missing body only fails when the contract marks the body required.
    /// A body in an undeclared media type is rejected before any schema runs.
    pub fn validate_body(
        &self,
        route: &RouteMeta,
        media_type: Option<&str>,
        body: Option<&Value>,
    ) -> Result<(), ClientError> {
        self.check_media_type(route, media_type, body.is_some())?;
        let (Some(meta), Some(body), Some(mt)) = (&route.request_body, body, media_type) else {
            return Ok(());
        };
        let Some(v) = declared_media_type(meta, mt)
            .and_then(|declared| self.validators.get(&SchemaKey::Body(declared.to_string())))
        else {
            return Ok(());
        };
        let mut details = Vec::new();
        collect_errors(v, body, "body", &mut details);
        if details.is_empty() {
            Ok(())
        } else {
            Err(ClientError::validation("request body does not match schema", details))
        }
    }
}

/// The declared media type a request's media type is matched to.
/// `text/text` and `text/plain` share a decoder and stand in for each other.
fn declared_media_type<'a>(meta: &'a RequestBodyMeta, media_type: &str) -> Option<&'a str> {
    let alias = match media_type {
        "text/text" => Some("text/plain"),
        "text/plain" => Some("text/text"),
        _ => None,
    };
    meta.content
        .iter()
        .find(|c| c.media_type == media_type)
        .or_else(|| alias.and_then(|a| meta.content.iter().find(|c| c.media_type == a)))
        .map(|c| c.media_type.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{load_contract_str, PackageInfo};
    use serde_json::json;

    fn route() -> RouteMeta {
        let contract = load_contract_str(
            r#"
openapi: 3.0.0
info: { title: t, version: "0" }
paths:
  /items/{id}:
    post:
      operationId: post_item
      parameters:
        - { name: id, in: path, required: true, schema: { type: integer } }
        - { name: limit, in: query, required: true, schema: { type: integer, maximum: 10 } }
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties:
                name: { type: string }
      responses: { "200": { description: ok } }
"#,
            &PackageInfo::current(),
        )
        .unwrap();
        contract.routes.into_iter().next().unwrap()
    }

    #[test]
    fn test_fail_if_issues_lists_everything() {
        assert!(fail_if_issues(Vec::new()).is_ok());
        let err = fail_if_issues(vec![
            ValidationIssue::new("GET /a", "MissingHandler", "no name"),
            ValidationIssue::new("GET /b", "MissingHandler", "no name"),
        ])
        .unwrap_err()
        .to_string();
        assert!(err.contains("2 issue(s)"));
        assert!(err.contains("GET /b"));
    }

    #[test]
    fn test_params_validated() {
        let route = route();
        let v = RouteValidator::compile(&route);
        let mut path = Map::new();
        path.insert("id".into(), json!(5));
        let mut query = Map::new();
        query.insert("limit".into(), json!(3));
        let empty = HashMap::new();
        assert!(v.validate_params(&route, &path, &query, &empty, &empty).is_ok());

        query.insert("limit".into(), json!(50));
        let err = v
            .validate_params(&route, &path, &query, &empty, &empty)
            .unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.details[0].contains("limit"));

        let err = v
            .validate_params(&route, &path, &Map::new(), &empty, &empty)
            .unwrap_err();
        assert!(err.details[0].contains("required"));
    }

    #[test]
    fn test_body_validated() {
        let route = route();
        let v = RouteValidator::compile(&route);
        assert!(v
            .validate_body(&route, Some("application/json"), Some(&json!({"name": "x"})))
            .is_ok());
        assert!(v
            .validate_body(&route, Some("application/json"), Some(&json!({"other": 1})))
            .is_err());
        assert!(v.validate_body(&route, None, None).is_err());
    }

    #[test]
    fn test_undeclared_media_type_rejected() {
        let route = route();
        let v = RouteValidator::compile(&route);

        let err = v
            .validate_body(&route, Some("text/plain"), Some(&json!("name=x")))
            .unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::UnsupportedMediaType);
        assert_eq!(err.status(), 415);
        assert_eq!(err.details, vec!["application/json".to_string()]);

        // raw bytes in a type nobody decodes
        let err = v
            .check_media_type(&route, Some("application/octet-stream"), true)
            .unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::UnsupportedMediaType);
        let err = v.check_media_type(&route, None, true).unwrap_err();
        assert!(err.message.contains("no content type"));

        // empty body on a required route is a validation error, whatever the type
        let err = v
            .check_media_type(&route, Some("application/octet-stream"), false)
            .unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::Validation);
    }

    #[test]
    fn test_text_media_types_stand_in_for_each_other() {
        let mut route = route();
        if let Some(body) = route.request_body.as_mut() {
            body.content[0].media_type = "text/plain".to_string();
            body.content[0].schema = Some(json!({"type": "string", "maxLength": 3}));
        }
        let v = RouteValidator::compile(&route);
        assert!(v
            .validate_body(&route, Some("text/text"), Some(&json!("abc")))
            .is_ok());
        let err = v
            .validate_body(&route, Some("text/text"), Some(&json!("abcdef")))
            .unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::Validation);
    }
}
