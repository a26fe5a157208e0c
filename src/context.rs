//! Request context consumed at the input boundary.
//!
//! Adapters (HTTP middleware, gRPC interceptors, custom frontends) build a
//! [`RequestContext`] from whatever transport they serve and hand it to the
//! decision service. The context is transport-free on purpose: the core never
//! sees framework request types.

use std::collections::HashMap;
use std::net::IpAddr;

/// A snapshot of the incoming request, as seen by key extraction and bypass
/// evaluation.
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct RequestContext {
    remote_addr: IpAddr,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    extensions: HashMap<String, String>,
    route: Option<String>,
    path: Option<String>,
}

impl RequestContext {
    /// Create a context for a caller at the given network address.
    pub fn new(remote_addr: IpAddr) -> Self {
        Self {
            remote_addr,
            headers: HashMap::new(),
            query: HashMap::new(),
            extensions: HashMap::new(),
            route: None,
            path: None,
        }
    }

    /// Attach a request header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a query parameter.
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Attach an opaque extension value for custom extractors.
    pub fn with_extension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    /// Set the route identifier used to look up per-route overrides.
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    /// Set the request path (used by path-prefix bypass rules).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// The caller's network address.
    pub fn remote_addr(&self) -> IpAddr {
        self.remote_addr
    }

    /// Look up a header value, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a query parameter value.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Look up an extension value set by the adapter.
    pub fn extension(&self, name: &str) -> Option<&str> {
        self.extensions.get(name).map(String::as_str)
    }

    /// The route identifier, if the adapter resolved one.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// The request path, if the adapter provided one.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}
