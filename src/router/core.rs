use crate::spec::RouteMeta;
use anyhow::Context;
use http::Method;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Path parameters in declaration order. Names come from the route table.
pub type ParamVec = Vec<(Arc<str>, String)>;

/// Result of successfully matching a request path to a route
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<RouteMeta>,
    /// Percent-decoded path parameters (e.g., `{id}` → `("id", "123")`)
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Get a path parameter by name (last occurrence wins)
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.route.handler_name
    }
}

/// One segment of a route pattern; statics sort before parameters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Static(String),
    Param,
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Segment::Static(_) => 0,
            Segment::Param => 1,
        }
    }
}

fn shape(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('{') && s.ends_with('}') {
                Segment::Param
            } else {
                Segment::Static(s.to_string())
            }
        })
        .collect()
}

/// Static segments beat parameters, compared left to right.
fn specificity(a: &[Segment], b: &[Segment]) -> Ordering {
    a.iter()
        .map(Segment::rank)
        .cmp(b.iter().map(Segment::rank))
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    regex: Regex,
    param_names: Vec<Arc<str>>,
    meta: Arc<RouteMeta>,
}

/// Matches HTTP requests to contract operations.
///
/// Routes are kept per method, ordered most specific first, so the first
/// regex that matches is the answer.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: HashMap<Method, Vec<CompiledRoute>>,
    count: usize,
}

impl Router {
    /// Build the routing table.
    ///
    /// # Errors
    ///
    /// Two operations with the same method and the same shape (identical
    /// static segments at identical positions) cannot be told apart and are
    /// rejected, as are patterns that do not compile.
    pub fn new(routes: Vec<RouteMeta>) -> anyhow::Result<Self> {
        let mut by_method: HashMap<Method, Vec<(Vec<Segment>, RouteMeta)>> = HashMap::new();
        for route in routes {
            let full = route.full_path();
            by_method
                .entry(route.method.clone())
                .or_default()
                .push((shape(&full), route));
        }

        let mut conflicts = Vec::new();
        let mut table = HashMap::new();
        let mut count = 0;
        for (method, mut entries) in by_method {
            entries.sort_by(|(a, _), (b, _)| specificity(a, b).then_with(|| a.cmp(b)));
            for pair in entries.windows(2) {
                if pair[0].0 == pair[1].0 {
                    conflicts.push(format!(
                        "{method} {} and {method} {}",
                        pair[0].1.full_path(),
                        pair[1].1.full_path()
                    ));
                }
            }
            let mut compiled = Vec::with_capacity(entries.len());
            for (_, meta) in entries {
                let (regex, param_names) = Self::path_to_regex(&meta.full_path())?;
                compiled.push(CompiledRoute {
                    regex,
                    param_names,
                    meta: Arc::new(meta),
                });
            }
            count += compiled.len();
            table.insert(method, compiled);
        }

        if !conflicts.is_empty() {
            anyhow::bail!("ambiguous routes: {}", conflicts.join("; "));
        }

        info!(routes_count = count, "Routing table loaded");
        Ok(Self {
            routes: table,
            count,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// All routes, most specific first within each method.
    pub fn routes(&self) -> impl Iterator<Item = &Arc<RouteMeta>> {
        self.routes.values().flatten().map(|r| &r.meta)
    }

    /// Match `path` (without query string) for `method`.
    #[must_use]
    pub fn route(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let candidates = self.routes.get(method)?;
        for candidate in candidates {
            let Some(caps) = candidate.regex.captures(path) else {
                continue;
            };
            let path_params = candidate
                .param_names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    let raw = caps.get(i + 1)?.as_str();
                    let value = urlencoding::decode(raw)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| raw.to_string());
                    Some((Arc::clone(name), value))
                })
                .collect();
            debug!(
                method = %method,
                path = %path,
                handler_name = %candidate.meta.handler_name,
                route_pattern = %candidate.meta.path_pattern,
                "Route matched"
            );
            return Some(RouteMatch {
                route: Arc::clone(&candidate.meta),
                path_params,
            });
        }
        debug!(method = %method, path = %path, "No route matched");
        None
    }

    /// Convert an OpenAPI path pattern to a regex and its parameter names.
    ///
    /// `/users/{id}` becomes `^/users/([^/]+)$` with params `["id"]`.
    pub(crate) fn path_to_regex(path: &str) -> anyhow::Result<(Regex, Vec<Arc<str>>)> {
        let mut pattern = String::with_capacity(path.len() + 5);
        pattern.push('^');
        let mut param_names = Vec::new();

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                pattern.push_str("/([^/]+)");
                param_names.push(Arc::from(name));
            } else {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
            }
        }
        if param_names.is_empty() && pattern.len() == 1 {
            pattern.push('/');
        }

        pattern.push('$');
        let regex = Regex::new(&pattern).with_context(|| format!("bad route pattern {path}"))?;
        Ok((regex, param_names))
    }
}
