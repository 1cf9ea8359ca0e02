//! HTTP verbs accepted by the route table.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use axum::routing::MethodFilter;

/// Closed set of verbs a route can be registered for. `Any` registers the
/// route for every verb and is also what unknown method names resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Any,
    Options,
    Get,
    Put,
    Post,
    Patch,
    Delete,
    Connect,
    Trace,
}

/// Concrete verbs `Any` expands to. GET routes also answer HEAD.
const VERBS: [HttpMethod; 8] = [
    HttpMethod::Options,
    HttpMethod::Get,
    HttpMethod::Put,
    HttpMethod::Post,
    HttpMethod::Patch,
    HttpMethod::Delete,
    HttpMethod::Connect,
    HttpMethod::Trace,
];

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Any => "any",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Concrete verbs this method registers against.
    pub fn verbs(self) -> Vec<HttpMethod> {
        match self {
            HttpMethod::Any => VERBS.to_vec(),
            verb => vec![verb],
        }
    }

    /// axum filter matching this method.
    pub fn filter(self) -> MethodFilter {
        match self {
            HttpMethod::Options => MethodFilter::OPTIONS,
            HttpMethod::Get => MethodFilter::GET,
            HttpMethod::Put => MethodFilter::PUT,
            HttpMethod::Post => MethodFilter::POST,
            HttpMethod::Patch => MethodFilter::PATCH,
            HttpMethod::Delete => MethodFilter::DELETE,
            HttpMethod::Connect => MethodFilter::CONNECT,
            HttpMethod::Trace => MethodFilter::TRACE,
            HttpMethod::Any => VERBS
                .iter()
                .fold(MethodFilter::GET, |acc, verb| acc.or(verb.filter())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Infallible;

    /// Case-insensitive. Anything unrecognised becomes `Any`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "OPTIONS" => HttpMethod::Options,
            "GET" => HttpMethod::Get,
            "PUT" => HttpMethod::Put,
            "POST" => HttpMethod::Post,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "CONNECT" => HttpMethod::Connect,
            "TRACE" => HttpMethod::Trace,
            _ => HttpMethod::Any,
        })
    }
}

impl From<&str> for HttpMethod {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(m) => m,
            Err(never) => match never {},
        }
    }
}
