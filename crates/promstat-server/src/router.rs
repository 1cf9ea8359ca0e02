//! Route table: declarative route/middleware entries compiled into an axum router.
//!
//! Middleware entries wrap either a single group (path-prefix scope) or the
//! whole router. Within a scope they run in the order they are listed; global
//! entries run before group entries. Route entries register
//! their chain for every verb their [`HttpMethod`] expands to.
//!
//! Routes are resolved to their full path (group prefix plus route path)
//! before registration, so any two entries that end up on the same verb and
//! path collapse to the last one, whichever groups they were declared in.
//! Gin-style `:name` and `*name` segments are accepted alongside axum's
//! `{name}` and `{*name}`; parameter names do not distinguish routes.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{on, MethodRouter},
    Router,
};
use futures_util::future::BoxFuture;

use promstat_core::error::{Result, StatsError};

use crate::method::HttpMethod;

/// Terminal request handler.
pub type Endpoint = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Request interceptor; call `next.run(req)` to continue the chain.
pub type Middleware = Arc<dyn Fn(Request, Next) -> BoxFuture<'static, Response> + Send + Sync>;

pub fn endpoint<F, Fut, R>(f: F) -> Endpoint
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |req: Request| -> BoxFuture<'static, Response> {
        let fut = f(req);
        Box::pin(async move { fut.await.into_response() })
    })
}

pub fn middleware<F, Fut, R>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |req: Request, next: Next| -> BoxFuture<'static, Response> {
        let fut = f(req, next);
        Box::pin(async move { fut.await.into_response() })
    })
}

async fn run_middleware(State(mw): State<Middleware>, req: Request, next: Next) -> Response {
    mw(req, next).await
}

/// Path-prefix scope for routes and middleware.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteGroup {
    prefix: String,
}

impl RouteGroup {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix.as_ref().trim_matches('/');
        Self {
            prefix: format!("/{trimmed}"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn is_root(&self) -> bool {
        self.prefix == "/"
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// A route path in axum syntax plus its shape (parameter names erased).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedPath {
    axum: String,
    shape: String,
}

fn invalid_path(path: &str, why: &str) -> StatsError {
    StatsError::Config(format!("invalid route path {path:?}: {why}"))
}

/// Translate `path` into axum syntax, rejecting what axum would panic on.
fn resolve_path(path: &str) -> Result<ResolvedPath> {
    let segments: Vec<&str> = path.split('/').skip(1).collect();
    let last = segments.len().saturating_sub(1);
    let mut axum = String::with_capacity(path.len());
    let mut shape = String::with_capacity(path.len());

    for (i, seg) in segments.iter().enumerate() {
        axum.push('/');
        shape.push('/');

        let param = if let Some(name) = seg.strip_prefix(':') {
            Some((name, false))
        } else if let Some(name) = seg.strip_prefix('*') {
            Some((name, true))
        } else if let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            match inner.strip_prefix('*') {
                Some(name) => Some((name, true)),
                None => Some((inner, false)),
            }
        } else {
            None
        };

        match param {
            Some((name, catch_all)) => {
                if name.is_empty() || name.contains(|c| matches!(c, '{' | '}' | ':' | '*')) {
                    return Err(invalid_path(path, "bad parameter name"));
                }
                if catch_all {
                    if i != last {
                        return Err(invalid_path(path, "wildcard must be the last segment"));
                    }
                    axum.push_str(&format!("{{*{name}}}"));
                    shape.push_str("{*}");
                } else {
                    axum.push_str(&format!("{{{name}}}"));
                    shape.push_str("{}");
                }
            }
            None => {
                if seg.contains(|c| matches!(c, '{' | '}')) {
                    return Err(invalid_path(path, "unbalanced braces"));
                }
                axum.push_str(seg);
                shape.push_str(seg);
            }
        }
    }
    Ok(ResolvedPath { axum, shape })
}

#[derive(Clone)]
pub struct RouteEntry {
    pub method: HttpMethod,
    pub path: String,
    pub group: Option<RouteGroup>,
    /// Route-scoped middleware, outermost first.
    pub chain: Vec<Middleware>,
    pub endpoint: Endpoint,
}

impl RouteEntry {
    pub fn new(method: HttpMethod, path: impl AsRef<str>, endpoint: Endpoint) -> Self {
        Self {
            method,
            path: normalize_path(path.as_ref()),
            group: None,
            chain: Vec::new(),
            endpoint,
        }
    }

    pub fn in_group(mut self, group: RouteGroup) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with(mut self, mw: Middleware) -> Self {
        self.chain.push(mw);
        self
    }

    /// Group prefix joined with the route path.
    pub fn full_path(&self) -> String {
        match scope(&self.group) {
            Some(g) if self.path == "/" => g.prefix().to_string(),
            Some(g) => format!("{}{}", g.prefix(), self.path),
            None => self.path.clone(),
        }
    }

    /// Route chain innermost, then `outer` (the group's middleware) around it.
    fn method_router(&self, verb: HttpMethod, outer: &[Middleware]) -> MethodRouter {
        let ep = Arc::clone(&self.endpoint);
        let mut route = on(verb.filter(), move |req: Request| ep(req));
        for mw in self.chain.iter().rev().chain(outer.iter().rev()) {
            route = route.route_layer(from_fn_with_state(Arc::clone(mw), run_middleware));
        }
        route
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("group", &self.group)
            .field("chain", &self.chain.len())
            .finish()
    }
}

#[derive(Clone)]
pub struct MiddlewareEntry {
    pub group: Option<RouteGroup>,
    pub chain: Vec<Middleware>,
}

impl MiddlewareEntry {
    /// Applies to every request the router sees.
    pub fn global(chain: Vec<Middleware>) -> Self {
        Self { group: None, chain }
    }

    /// Applies only to routes registered under `group`.
    pub fn group(group: RouteGroup, chain: Vec<Middleware>) -> Self {
        Self {
            group: Some(group),
            chain,
        }
    }
}

impl fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("group", &self.group)
            .field("chain", &self.chain.len())
            .finish()
    }
}

#[derive(Default)]
struct PathSlot {
    // axum spelling of the latest entry registered on this shape
    path: String,
    verbs: BTreeMap<HttpMethod, usize>,
}

#[derive(Default, Clone, Debug)]
pub struct RouteTable {
    middleware: Vec<MiddlewareEntry>,
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn middleware(mut self, entry: MiddlewareEntry) -> Self {
        self.middleware.push(entry);
        self
    }

    pub fn route(mut self, entry: RouteEntry) -> Self {
        self.routes.push(entry);
        self
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Like [`build`](Self::build), but fails on the first malformed path
    /// instead of skipping it.
    pub fn try_build(self) -> Result<Router> {
        for entry in &self.routes {
            resolve_path(&entry.full_path())?;
        }
        Ok(self.build())
    }

    /// Compile into a servable router. Entries with malformed paths are
    /// skipped with a warning.
    pub fn build(self) -> Router {
        // shape -> verb -> index of the winning entry
        let mut table: BTreeMap<String, PathSlot> = BTreeMap::new();
        for (idx, entry) in self.routes.iter().enumerate() {
            let full = entry.full_path();
            let resolved = match resolve_path(&full) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, method = %entry.method, "skipping route");
                    continue;
                }
            };
            let slot = table.entry(resolved.shape).or_default();
            slot.path = resolved.axum;
            for verb in entry.method.verbs() {
                if slot.verbs.insert(verb, idx).is_some() {
                    tracing::debug!(method = %verb, path = %full, "route re-registered; last entry wins");
                }
            }
        }

        let mut group_chains: BTreeMap<RouteGroup, Vec<Middleware>> = BTreeMap::new();
        let mut global: Vec<Middleware> = Vec::new();
        for entry in &self.middleware {
            match scope(&entry.group) {
                Some(g) => group_chains.entry(g).or_default().extend(entry.chain.iter().cloned()),
                None => global.extend(entry.chain.iter().cloned()),
            }
        }

        let mut top = Router::new();
        for slot in table.into_values() {
            let mut method_router: Option<MethodRouter> = None;
            for (verb, idx) in slot.verbs {
                let entry = &self.routes[idx];
                let outer = scope(&entry.group)
                    .and_then(|g| group_chains.get(&g))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let one = entry.method_router(verb, outer);
                method_router = Some(match method_router {
                    Some(mr) => mr.merge(one),
                    None => one,
                });
            }
            if let Some(method_router) = method_router {
                top = top.route(&slot.path, method_router);
            }
        }

        // Layers added later wrap outermost, so apply in reverse.
        for mw in global.iter().rev() {
            top = top.layer(from_fn_with_state(Arc::clone(mw), run_middleware));
        }
        top
    }
}

/// Root groups are the same scope as no group.
fn scope(group: &Option<RouteGroup>) -> Option<RouteGroup> {
    group.as_ref().filter(|g| !g.is_root()).cloned()
}
