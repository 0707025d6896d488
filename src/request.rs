//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, Method, Uri};
use url::form_urlencoded;

use crate::context::Context;
use crate::multipart;

/// An incoming HTTP request with its body fully buffered.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    context: Context,
}

impl Request {
    pub(crate) fn from_parts(
        parts: http::request::Parts,
        body: Bytes,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            params,
            context: Context::default(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn context(&self) -> &Context { &self.context }
    pub fn context_mut(&mut self) -> &mut Context { &mut self.context }

    /// Case-insensitive header lookup. Returns the first value, if it is
    /// visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Attaches a path parameter. The router does this for matched routes;
    /// adapters and tests can do it by hand.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Every value bound to `name` in the query string, in order.
    pub fn query_values(&self, name: &str) -> Vec<String> {
        let query = self.uri.query().unwrap_or_default();
        values_named(query.as_bytes(), name)
    }

    /// Every value bound to `name` in a form body, in order. Reads
    /// `application/x-www-form-urlencoded` bodies and the text fields of
    /// `multipart/form-data` ones; other content types yield nothing.
    pub fn form_values(&self, name: &str) -> Vec<String> {
        let Some(content_type) = self.header(CONTENT_TYPE.as_str()) else {
            return Vec::new();
        };
        if let Some(boundary) = multipart::boundary(content_type) {
            return multipart::field_values(&self.body, boundary, name);
        }
        let is_urlencoded = content_type
            .split(';')
            .next()
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"));
        if !is_urlencoded {
            return Vec::new();
        }
        values_named(&self.body, name)
    }

    /// All cookies sent with the request, in header order. Duplicate names
    /// are kept.
    pub fn cookies(&self) -> Vec<(&str, &str)> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                Some((name, value))
            })
            .collect()
    }

    /// The first cookie named `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().into_iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body, HashMap::new())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

fn values_named(encoded: &[u8], name: &str) -> Vec<String> {
    form_urlencoded::parse(encoded)
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .collect()
}
