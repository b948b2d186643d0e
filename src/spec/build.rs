use super::types::{
    BodyContent, ParameterLocation, ParameterMeta, ParameterStyle, RequestBodyMeta, ResponseSpec,
    Responses, RouteMeta,
};
use crate::validator::{fail_if_issues, ValidationIssue};
use oas3::spec::{ObjectOrReference, Parameter};
use oas3::OpenApiV3Spec;
use serde_json::Value;
use std::sync::Arc;

/// Field name used when a multipart body declares no binary property.
pub const DEFAULT_UPLOAD_FIELD: &str = "file";

/// Resolve a `#/components/schemas/<name>` reference.
pub fn resolve_schema_ref<'a>(
    spec: &'a OpenApiV3Spec,
    ref_path: &str,
) -> Option<&'a oas3::spec::ObjectSchema> {
    let name = ref_path.strip_prefix("#/components/schemas/")?;
    spec.components
        .as_ref()?
        .schemas
        .get(name)
        .and_then(|schema_ref| match schema_ref {
            ObjectOrReference::Object(schema) => Some(schema),
            _ => None,
        })
}

/// Recursively replace every `$ref` in `value` with the schema it points to.
///
/// Expanded objects carry an `x-ref-name` marker with the component name.
/// References that cannot be resolved are left in place.
pub fn expand_schema_refs(spec: &OpenApiV3Spec, value: &mut Value) {
    expand_schema_refs_depth(spec, value, 0);
}

fn expand_schema_refs_depth(spec: &OpenApiV3Spec, value: &mut Value, depth: usize) {
    // self-referencing components would otherwise recurse forever
    if depth > 32 {
        return;
    }
    match value {
        Value::Object(obj) => {
            if let Some(ref_path) = obj.get("$ref").and_then(|v| v.as_str()) {
                if let Some(schema) = resolve_schema_ref(spec, ref_path) {
                    if let Ok(mut new_val) = serde_json::to_value(schema) {
                        expand_schema_refs_depth(spec, &mut new_val, depth + 1);
                        if let Some(name) = ref_path.strip_prefix("#/components/schemas/") {
                            if let Value::Object(o) = &mut new_val {
                                o.insert("x-ref-name".to_string(), Value::String(name.to_string()));
                            }
                        }
                        *value = new_val;
                        return;
                    }
                }
            }
            for v in obj.values_mut() {
                expand_schema_refs_depth(spec, v, depth + 1);
            }
        }
        Value::Array(arr) => {
            for v in arr.iter_mut() {
                expand_schema_refs_depth(spec, v, depth + 1);
            }
        }
        _ => {}
    }
}

fn schema_value(
    spec: &OpenApiV3Spec,
    schema: Option<&ObjectOrReference<oas3::spec::ObjectSchema>>,
) -> Option<Value> {
    let mut value = match schema? {
        ObjectOrReference::Object(obj) => serde_json::to_value(obj).ok(),
        ObjectOrReference::Ref { ref_path, .. } => {
            resolve_schema_ref(spec, ref_path).and_then(|s| serde_json::to_value(s).ok())
        }
    }?;
    expand_schema_refs(spec, &mut value);
    Some(value)
}

/// Handler name: an `x-handler*` extension wins over `operationId`.
fn resolve_handler_name(
    operation: &oas3::spec::Operation,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    operation
        .extensions
        .iter()
        .find_map(|(key, val)| {
            // oas3 may hand extensions over with the `x-` prefix stripped
            let key = key.strip_prefix("x-").unwrap_or(key);
            if key.starts_with("handler") {
                if let Value::String(s) = val {
                    return Some(s.clone());
                }
            }
            None
        })
        .or_else(|| operation.operation_id.clone())
        .or_else(|| {
            issues.push(ValidationIssue::new(
                location,
                "MissingHandler",
                "Missing operationId or x-handler-* extension",
            ));
            None
        })
}

/// First property declared as `format: binary`, the file field of a multipart body.
fn binary_property(schema: &Value) -> Option<String> {
    schema
        .get("properties")?
        .as_object()?
        .iter()
        .find(|(_, prop)| prop.get("format").and_then(Value::as_str) == Some("binary"))
        .map(|(name, _)| name.clone())
}

/// Collect every declared media type of the request body.
///
/// Media types are lowercased so that lookups by the content pipeline are
/// case-insensitive. A multipart body always yields an upload field name.
pub fn extract_request_body(
    spec: &OpenApiV3Spec,
    operation: &oas3::spec::Operation,
) -> Option<RequestBodyMeta> {
    let ObjectOrReference::Object(req_body) = operation.request_body.as_ref()? else {
        return None;
    };

    let mut content = Vec::new();
    let mut upload_field = None;
    for (media_type, media) in &req_body.content {
        let media_type = media_type.to_ascii_lowercase();
        let schema = schema_value(spec, media.schema.as_ref());
        if media_type == "multipart/form-data" {
            upload_field = Some(
                schema
                    .as_ref()
                    .and_then(binary_property)
                    .unwrap_or_else(|| DEFAULT_UPLOAD_FIELD.to_string()),
            );
        }
        content.push(BodyContent { media_type, schema });
    }

    Some(RequestBodyMeta {
        required: req_body.required.unwrap_or(false),
        content,
        upload_field,
    })
}

/// Response schemas by status and media type, plus the default success schema.
///
/// The default prefers `200 application/json`, then any 2xx JSON response,
/// then any 2xx response with a schema.
pub fn extract_responses(
    spec: &OpenApiV3Spec,
    operation: &oas3::spec::Operation,
) -> (Option<Value>, Responses) {
    let mut all: Responses = std::collections::HashMap::new();

    if let Some(responses_map) = operation.responses.as_ref() {
        for (status_str, resp_ref) in responses_map {
            let Ok(status) = status_str.parse::<u16>() else {
                continue;
            };
            if let ObjectOrReference::Object(resp_obj) = resp_ref {
                for (mt, media) in &resp_obj.content {
                    let schema = schema_value(spec, media.schema.as_ref());
                    all.entry(status)
                        .or_default()
                        .insert(mt.clone(), ResponseSpec { schema });
                }
            }
        }
    }

    let mut statuses: Vec<u16> = all.keys().copied().filter(|s| (200..300).contains(s)).collect();
    statuses.sort_unstable();

    let default_schema = all
        .get(&200)
        .and_then(|m| m.get("application/json"))
        .and_then(|r| r.schema.clone())
        .or_else(|| {
            statuses
                .iter()
                .find_map(|s| all.get(s).and_then(|m| m.get("application/json")))
                .and_then(|r| r.schema.clone())
        })
        .or_else(|| {
            statuses
                .iter()
                .filter_map(|s| all.get(s))
                .flat_map(|m| m.values())
                .find_map(|r| r.schema.clone())
        });

    (default_schema, all)
}

fn resolve_parameter_ref<'a>(
    spec: &'a OpenApiV3Spec,
    ref_path: &str,
) -> Option<&'a oas3::spec::Parameter> {
    let name = ref_path.strip_prefix("#/components/parameters/")?;
    spec.components
        .as_ref()?
        .parameters
        .get(name)
        .and_then(|param_ref| match param_ref {
            ObjectOrReference::Object(param) => Some(param),
            _ => None,
        })
}

/// Resolve path, query, header and cookie parameters (following `$ref`s).
pub fn extract_parameters(
    spec: &OpenApiV3Spec,
    params: &[ObjectOrReference<Parameter>],
) -> Vec<ParameterMeta> {
    let mut out = Vec::new();
    for p in params {
        let param = match p {
            ObjectOrReference::Object(obj) => Some(obj),
            ObjectOrReference::Ref { ref_path, .. } => resolve_parameter_ref(spec, ref_path),
        };

        if let Some(param) = param {
            let location = ParameterLocation::from(param.location);
            out.push(ParameterMeta {
                name: param.name.clone(),
                location,
                // path parameters are always required
                required: location == ParameterLocation::Path || param.required.unwrap_or(false),
                schema: schema_value(spec, param.schema.as_ref()),
                style: param.style.map(ParameterStyle::from),
                explode: param.explode,
            });
        }
    }
    out
}

/// Merge path-level and operation-level parameters; operation entries win.
fn merge_parameters(path_level: Vec<ParameterMeta>, op_level: Vec<ParameterMeta>) -> Vec<ParameterMeta> {
    let mut merged: Vec<ParameterMeta> = path_level
        .into_iter()
        .filter(|p| {
            !op_level
                .iter()
                .any(|o| o.name == p.name && o.location == p.location)
        })
        .collect();
    merged.extend(op_level);
    merged
}

/// Path prefix from the first `servers` entry, without a trailing slash.
#[must_use]
pub fn base_path(spec: &OpenApiV3Spec) -> String {
    let Some(server) = spec.servers.first() else {
        return String::new();
    };
    let url_str = &server.url;
    url::Url::parse(url_str)
        .or_else(|_| url::Url::parse(&format!("http://placeholder{url_str}")))
        .map(|u| {
            let p = u.path().trim_end_matches('/');
            if p == "/" || p.is_empty() {
                String::new()
            } else {
                p.to_string()
            }
        })
        .unwrap_or_default()
}

/// Build route metadata for every operation in the contract.
///
/// # Errors
///
/// Fails when an operation has no resolvable handler name or a path
/// placeholder has no matching `in: path` parameter.
pub fn build_routes(spec: &OpenApiV3Spec) -> anyhow::Result<Vec<RouteMeta>> {
    let mut routes = Vec::new();
    let mut issues = Vec::new();
    let base_path = base_path(spec);

    if let Some(paths_map) = spec.paths.as_ref() {
        for (path, item) in paths_map {
            for (method, operation) in item.methods() {
                let location = format!("{method} {path}");

                let Some(handler_name) = resolve_handler_name(operation, &location, &mut issues)
                else {
                    continue;
                };

                let parameters = merge_parameters(
                    extract_parameters(spec, &item.parameters),
                    extract_parameters(spec, &operation.parameters),
                );

                for placeholder in path_placeholders(path) {
                    let declared = parameters
                        .iter()
                        .any(|p| p.location == ParameterLocation::Path && p.name == placeholder);
                    if !declared {
                        issues.push(ValidationIssue::new(
                            &location,
                            "UndeclaredPathParameter",
                            format!("{{{placeholder}}} has no matching path parameter"),
                        ));
                    }
                }

                let request_body = extract_request_body(spec, operation);
                let (response_schema, responses) = extract_responses(spec, operation);

                routes.push(RouteMeta {
                    method: method.clone(),
                    path_pattern: Arc::from(path.as_str()),
                    handler_name: Arc::from(handler_name.as_str()),
                    parameters,
                    request_body,
                    response_schema,
                    responses,
                    base_path: base_path.clone(),
                });
            }
        }
    }

    fail_if_issues(issues)?;
    Ok(routes)
}

fn path_placeholders(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter_map(|seg| {
        seg.strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(yaml: &str) -> OpenApiV3Spec {
        serde_yaml::from_str(yaml).unwrap()
    }

    const CONTRACT: &str = r#"
openapi: 3.0.0
info: { title: test, version: "0" }
servers:
  - url: /api
paths:
  /recordings/{id}:
    parameters:
      - name: id
        in: path
        required: true
        schema: { type: string }
    get:
      operationId: get_recording
      parameters:
        - name: verbose
          in: query
          schema: { type: boolean }
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: '#/components/schemas/Recording' }
  /encode:
    post:
      x-handler-encode: encode_video
      operationId: ignored
      requestBody:
        required: true
        content:
          multipart/form-data:
            schema:
              type: object
              properties:
                title: { type: string }
                video: { type: string, format: binary }
      responses:
        "202": { description: accepted }
components:
  schemas:
    Recording:
      type: object
      properties:
        id: { type: string }
"#;

    #[test]
    fn test_build_routes_resolves_handlers_and_bodies() {
        let spec = parse(CONTRACT);
        let routes = build_routes(&spec).unwrap();
        assert_eq!(routes.len(), 2);

        let get = routes.iter().find(|r| &*r.handler_name == "get_recording").unwrap();
        assert_eq!(get.base_path, "/api");
        assert_eq!(get.full_path(), "/api/recordings/{id}");
        assert_eq!(get.parameters.len(), 2);
        assert!(get.parameters.iter().any(|p| p.name == "id" && p.required));
        assert_eq!(
            get.response_schema.as_ref().unwrap()["x-ref-name"],
            json!("Recording")
        );

        let encode = routes.iter().find(|r| r.method == http::Method::POST).unwrap();
        assert_eq!(&*encode.handler_name, "encode_video");
        let body = encode.request_body.as_ref().unwrap();
        assert!(body.required);
        assert!(body.declares("multipart/form-data"));
        assert_eq!(encode.upload_field(), Some("video"));
    }

    #[test]
    fn test_missing_handler_is_an_error() {
        let spec = parse(
            r#"
openapi: 3.0.0
info: { title: test, version: "0" }
paths:
  /x:
    get:
      responses: { "200": { description: ok } }
"#,
        );
        let err = build_routes(&spec).unwrap_err();
        assert!(err.to_string().contains("MissingHandler"));
    }

    #[test]
    fn test_undeclared_path_parameter_is_an_error() {
        let spec = parse(
            r#"
openapi: 3.0.0
info: { title: test, version: "0" }
paths:
  /x/{id}:
    get:
      operationId: x
      responses: { "200": { description: ok } }
"#,
        );
        assert!(build_routes(&spec).is_err());
    }

    #[test]
    fn test_multipart_without_binary_property_defaults_field() {
        assert_eq!(binary_property(&json!({"properties": {"a": {"type": "string"}}})), None);
        let spec = parse(
            r#"
openapi: 3.0.0
info: { title: test, version: "0" }
paths:
  /up:
    post:
      operationId: up
      requestBody:
        content:
          multipart/form-data: {}
      responses: { "200": { description: ok } }
"#,
        );
        let routes = build_routes(&spec).unwrap();
        assert_eq!(routes[0].upload_field(), Some(DEFAULT_UPLOAD_FIELD));
    }
}
