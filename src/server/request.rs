use crate::ids::RequestId;
use crate::router::RouteMatch;
use crate::spec::{ParameterLocation, ParameterStyle, RouteMeta};
use may_minihttp::Request;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

/// Everything known about a request before its body is read.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHead {
    pub request_id: RequestId,
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Lowercased header names
    pub headers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
}

impl RequestHead {
    /// Read the request line and headers; the body stays on the socket.
    #[must_use]
    pub fn from_request(req: &Request) -> Self {
        let headers: HashMap<String, String> = req
            .headers()
            .iter()
            .map(|h| {
                (
                    h.name.to_ascii_lowercase(),
                    String::from_utf8_lossy(h.value).to_string(),
                )
            })
            .collect();
        Self::from_parts(req.method(), req.path(), headers)
    }

    /// Build from already extracted parts.
    #[must_use]
    pub fn from_parts(method: &str, raw_path: &str, headers: HashMap<String, String>) -> Self {
        let path = raw_path.split('?').next().unwrap_or("/").to_string();
        let request_id = RequestId::from_header_or_new(headers.get("x-request-id").map(String::as_str));
        let cookies = parse_cookies(&headers);
        let query_params = parse_query_params(raw_path);
        debug!(
            request_id = %request_id,
            method = %method,
            path = %path,
            header_count = headers.len(),
            query_count = query_params.len(),
            cookie_count = cookies.len(),
            "HTTP request parsed"
        );
        Self {
            request_id,
            method: method.to_string(),
            path,
            headers,
            cookies,
            query_params,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Declared body length; `0` when absent or unparsable.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Cookies from the `cookie` header.
#[must_use]
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim();
                    if name.is_empty() {
                        return None;
                    }
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name.to_string(), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// URL-decoded query parameters of a request target.
#[must_use]
pub fn parse_query_params(path: &str) -> HashMap<String, String> {
    match path.split_once('?') {
        Some((_, query_str)) => url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        None => HashMap::new(),
    }
}

/// Decode a parameter value according to its schema and style.
///
/// Converts the raw string to the JSON type the schema declares (integer,
/// number, boolean, array, object). Values that do not convert stay strings
/// so schema validation can report them.
#[must_use]
pub fn decode_param_value(
    value: &str,
    schema: Option<&Value>,
    style: Option<ParameterStyle>,
    explode: Option<bool>,
) -> Value {
    fn convert_primitive(val: &str, schema: Option<&Value>) -> Value {
        match schema.and_then(|s| s.get("type")).and_then(Value::as_str) {
            Some("integer") => val
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(val.to_string())),
            Some("number") => val
                .parse::<f64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(val.to_string())),
            Some("boolean") => val
                .parse::<bool>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(val.to_string())),
            _ => Value::String(val.to_string()),
        }
    }

    match schema.and_then(|s| s.get("type")).and_then(Value::as_str) {
        Some("array") => {
            let items_schema = schema.and_then(|s| s.get("items"));
            let delim = match style.unwrap_or(ParameterStyle::Form) {
                ParameterStyle::SpaceDelimited => ' ',
                ParameterStyle::PipeDelimited => '|',
                _ => ',',
            };
            let parts = value
                .split(delim)
                .filter(|s| !s.is_empty())
                .map(|p| convert_primitive(p.trim(), items_schema))
                .collect();
            Value::Array(parts)
        }
        Some("object") => {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(value) {
                return v;
            }
            // form style, not exploded: `k1,v1,k2,v2`
            if explode == Some(false) || style == Some(ParameterStyle::Simple) {
                let parts: Vec<&str> = value.split(',').collect();
                if parts.len() % 2 == 0 {
                    let props = schema.and_then(|s| s.get("properties"));
                    let map: Map<String, Value> = parts
                        .chunks(2)
                        .map(|kv| {
                            let prop = props.and_then(|p| p.get(kv[0]));
                            (kv[0].to_string(), convert_primitive(kv[1], prop))
                        })
                        .collect();
                    return Value::Object(map);
                }
            }
            Value::String(value.to_string())
        }
        _ => convert_primitive(value, schema),
    }
}

/// Decode the path and query parameters a route declares.
///
/// Undeclared query parameters are passed through as strings.
#[must_use]
pub fn decode_route_params(
    route: &RouteMeta,
    route_match: &RouteMatch,
    query: &HashMap<String, String>,
) -> (Map<String, Value>, Map<String, Value>) {
    let declared = |loc: ParameterLocation, name: &str| {
        route
            .parameters
            .iter()
            .find(|p| p.location == loc && p.name == name)
    };

    let path = route_match
        .path_params
        .iter()
        .map(|(name, raw)| {
            let value = match declared(ParameterLocation::Path, name.as_ref()) {
                Some(p) => decode_param_value(raw, p.schema.as_ref(), p.style, p.explode),
                None => Value::String(raw.clone()),
            };
            (name.to_string(), value)
        })
        .collect();

    let query = query
        .iter()
        .map(|(name, raw)| {
            let value = match declared(ParameterLocation::Query, name.as_str()) {
                Some(p) => decode_param_value(raw, p.schema.as_ref(), p.style, p.explode),
                None => Value::String(raw.clone()),
            };
            (name.clone(), value)
        })
        .collect();

    (path, query)
}
