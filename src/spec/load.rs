use super::build::{base_path, build_routes};
use super::types::RouteMeta;
use anyhow::Context;
use oas3::OpenApiV3Spec;
use serde_json::Value;
use std::path::Path;

/// Name and version advertised in the served contract document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

impl PackageInfo {
    /// Package metadata of this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A loaded API contract.
#[derive(Debug, Clone)]
pub struct Contract {
    /// The contract as served at the docs endpoint, with `info` patched
    pub document: Value,
    pub routes: Vec<RouteMeta>,
    pub base_path: String,
}

impl Contract {
    #[must_use]
    pub fn title(&self) -> &str {
        self.document["info"]["title"].as_str().unwrap_or_default()
    }
}

fn strip_unknown_verbs(val: &mut Value) {
    const METHODS: [&str; 8] = ["get", "post", "put", "delete", "patch", "options", "head", "trace"];

    let Some(Value::Object(paths_map)) = val.get_mut("paths") else {
        return;
    };
    for item in paths_map.values_mut() {
        if let Value::Object(obj) = item {
            obj.retain(|k, _| {
                let lk = k.to_ascii_lowercase();
                match lk.as_str() {
                    "summary" | "description" | "servers" | "parameters" | "$ref" => true,
                    m if METHODS.contains(&m) => true,
                    _ => k.starts_with("x-"),
                }
            });
        }
    }
}

fn apply_package_info(val: &mut Value, package: &PackageInfo) {
    if let Some(Value::Object(info)) = val.get_mut("info") {
        info.insert("title".to_string(), Value::String(package.name.clone()));
        info.insert("version".to_string(), Value::String(package.version.clone()));
    }
}

/// Load a YAML or JSON contract from disk.
///
/// # Errors
///
/// Unreadable files, invalid documents and unroutable operations all fail.
pub fn load_contract(path: &Path, package: &PackageInfo) -> anyhow::Result<Contract> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading contract {}", path.display()))?;
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let value: Value = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    contract_from_value(value, package)
        .with_context(|| format!("loading contract {}", path.display()))
}

/// Load a contract from an in-memory YAML (or JSON, which is valid YAML) string.
pub fn load_contract_str(content: &str, package: &PackageInfo) -> anyhow::Result<Contract> {
    let value: Value = serde_yaml::from_str(content)?;
    contract_from_value(value, package)
}

fn contract_from_value(mut value: Value, package: &PackageInfo) -> anyhow::Result<Contract> {
    strip_unknown_verbs(&mut value);
    apply_package_info(&mut value, package);
    let spec: OpenApiV3Spec =
        serde_json::from_value(value.clone()).context("not an OpenAPI 3 document")?;
    let routes = build_routes(&spec)?;
    Ok(Contract {
        document: value,
        routes,
        base_path: base_path(&spec),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_unknown_verbs() {
        let mut v = json!({
            "paths": {
                "/x": { "get": {}, "patch": {}, "unknown": {}, "x-keep": 1 }
            }
        });
        strip_unknown_verbs(&mut v);
        assert!(v["paths"]["/x"].get("unknown").is_none());
        assert!(v["paths"]["/x"].get("x-keep").is_some());
    }

    #[test]
    fn test_info_replaced_with_package_info() {
        let contract = load_contract_str(
            r#"
openapi: 3.0.0
info: { title: recorder, version: "9.9.9" }
servers: [ { url: /api } ]
paths:
  /ping:
    get:
      operationId: ping
      responses: { "200": { description: ok } }
"#,
            &PackageInfo {
                name: "mediagate".into(),
                version: "1.2.3".into(),
            },
        )
        .unwrap();
        assert_eq!(contract.title(), "mediagate");
        assert_eq!(contract.document["info"]["version"], "1.2.3");
        assert_eq!(contract.base_path, "/api");
        assert_eq!(contract.routes.len(), 1);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(load_contract_str("just: [a, list", &PackageInfo::current()).is_err());
    }
}
