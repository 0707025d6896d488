//! Cross-Origin Resource Sharing.
//!
//! [`Cors::check`] turns the configured policy and one request into a
//! [`CorsResult`]: the headers to add, and whether the request is answered
//! right here (`204` for preflights) or continues down the chain. It reads
//! nothing but the request and the policy, so checking the same request
//! twice yields the same result.
//!
//! Origins are approved cheapest test first:
//!
//! 1. a custom approval function, when set, decides alone;
//! 2. `*`, exact matches, and `scheme://*.domain` subdomain patterns;
//! 3. glob patterns (`*` and `?`), compiled to anchored regexes at startup.
//!    Skipped for origins without `://` or longer than a domain name can be.
//!
//! Preflights echo the router's `Allow` list (see
//! [`ROUTER_ALLOW`](crate::ROUTER_ALLOW)) and, when no methods were
//! configured, use it for `Access-Control-Allow-Methods`.

use std::sync::Arc;

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, ALLOW, ORIGIN, VARY,
};
use http::{HeaderName, Method, StatusCode};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::handler::BoxFuture;
use crate::middleware::{
    BoxError, ErrorHandler, HttpError, JsonErrorHandler, Middleware, NeverSkip, Next, Skipper,
};
use crate::request::Request;
use crate::response::Response;
use crate::router::{AllowedMethods, ROUTER_ALLOW};

/// Longest domain name plus room for a scheme and `://`.
const MAX_PATTERN_ORIGIN_LEN: usize = 253 + 3 + 5;
const MAX_AUTHORITY_LEN: usize = 253;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    /// Literal origins, `*`, or glob patterns such as `https://*.example.com`.
    /// Empty means `*`.
    pub allow_origins: Vec<String>,
    /// Empty means every standard method, and lets preflights fall back to
    /// the router's `Allow` list.
    pub allow_methods: Vec<String>,
    /// Empty mirrors `Access-Control-Request-Headers` back.
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    /// With `allow_credentials`, a `*` entry grants the caller's own origin.
    /// Any site can then make credentialed requests; use with care.
    pub unsafe_wildcard_origin_with_allow_credentials: bool,
    pub expose_headers: Vec<String>,
    /// Seconds. Zero or less leaves `Access-Control-Max-Age` out.
    pub max_age: i64,
}

const DEFAULT_METHODS: [Method; 9] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::CONNECT,
    Method::OPTIONS,
    Method::TRACE,
];

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_owned()],
            allow_methods: DEFAULT_METHODS.iter().map(|m| m.as_str().to_owned()).collect(),
            allow_headers: ["Origin", "Content-Type", "Accept", "Authorization", "Cookie", "X-CSRF-Token"]
                .map(str::to_owned)
                .to_vec(),
            allow_credentials: false,
            unsafe_wildcard_origin_with_allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: 0,
        }
    }
}

/// Headers to add to the response, and whether the chain stops here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CorsResult {
    pub headers: Vec<(HeaderName, String)>,
    /// `true` for preflights: answer `204 No Content` without calling the
    /// next handler.
    pub end_response: bool,
}

impl CorsResult {
    fn apply(self, res: &mut Response) {
        for (name, value) in self.headers {
            if name == VARY {
                res.append_header(name.as_str(), value);
            } else {
                res.set_header(name.as_str(), value);
            }
        }
    }
}

type OriginFn = dyn Fn(&str) -> Result<bool, BoxError> + Send + Sync;

/// CORS middleware.
pub struct Cors {
    allow_origins: Vec<String>,
    patterns: Vec<Regex>,
    allow_methods: String,
    custom_methods: bool,
    allow_headers: String,
    expose_headers: String,
    allow_credentials: bool,
    unsafe_wildcard: bool,
    max_age: i64,
    origin_fn: Option<Arc<OriginFn>>,
    skipper: Arc<dyn Skipper>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Cors {
    /// Compiles the origin patterns. Fails if one of them cannot be turned
    /// into a regex.
    pub fn new(config: CorsConfig) -> Result<Self, ConfigError> {
        let allow_origins = if config.allow_origins.is_empty() {
            vec!["*".to_owned()]
        } else {
            config.allow_origins
        };
        let patterns = allow_origins.iter()
            .map(|origin| glob_to_regex(origin))
            .collect::<Result<Vec<_>, _>>()?;

        let custom_methods = !config.allow_methods.is_empty();
        let allow_methods = if custom_methods {
            config.allow_methods.join(",")
        } else {
            DEFAULT_METHODS.iter().map(Method::as_str).collect::<Vec<_>>().join(",")
        };

        if config.allow_credentials
            && config.unsafe_wildcard_origin_with_allow_credentials
            && allow_origins.iter().any(|o| o == "*")
        {
            warn!("cors grants any origin with credentials; every site can make authenticated requests");
        }

        Ok(Self {
            allow_origins,
            patterns,
            allow_methods,
            custom_methods,
            allow_headers: config.allow_headers.join(","),
            expose_headers: config.expose_headers.join(","),
            allow_credentials: config.allow_credentials,
            unsafe_wildcard: config.unsafe_wildcard_origin_with_allow_credentials,
            max_age: config.max_age,
            origin_fn: None,
            skipper: Arc::new(NeverSkip),
            error_handler: Arc::new(JsonErrorHandler::new()),
        })
    }

    pub fn skipper(mut self, skipper: impl Skipper) -> Self {
        self.skipper = Arc::new(skipper);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Lets `f` decide every origin instead of `allow_origins`. An error
    /// aborts the request through the error handler (`500` unless it is an
    /// [`HttpError`]).
    pub fn allow_origin_fn<F, E>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<bool, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let approve = move |origin: &str| -> Result<bool, BoxError> { f(origin).map_err(Into::into) };
        self.origin_fn = Some(Arc::new(approve));
        self
    }

    /// Decides the CORS headers for `req`.
    pub fn check(&self, req: &Request) -> Result<CorsResult, HttpError> {
        let preflight = *req.method() == Method::OPTIONS;
        let mut headers = vec![(VARY, "Origin".to_owned())];

        let router_allow = preflight
            .then(|| req.context().get(ROUTER_ALLOW))
            .flatten()
            .map(|AllowedMethods(allow)| allow.as_str())
            .filter(|allow| !allow.is_empty());
        if let Some(allow) = router_allow {
            headers.push((ALLOW, allow.to_owned()));
        }

        let Some(origin) = req.header(ORIGIN.as_str()).filter(|o| !o.is_empty()) else {
            return Ok(CorsResult { headers, end_response: preflight });
        };

        let Some(allow_origin) = self.resolve_origin(origin)? else {
            debug!(origin, preflight, "cors origin not allowed");
            return Ok(CorsResult { headers, end_response: preflight });
        };

        headers.push((ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin));
        if self.allow_credentials {
            headers.push((ACCESS_CONTROL_ALLOW_CREDENTIALS, "true".to_owned()));
        }

        if !preflight {
            if !self.expose_headers.is_empty() {
                headers.push((ACCESS_CONTROL_EXPOSE_HEADERS, self.expose_headers.clone()));
            }
            return Ok(CorsResult { headers, end_response: false });
        }

        headers.push((VARY, "Access-Control-Request-Method".to_owned()));
        headers.push((VARY, "Access-Control-Request-Headers".to_owned()));

        let methods = match router_allow {
            Some(allow) if !self.custom_methods => allow.to_owned(),
            _ => self.allow_methods.clone(),
        };
        headers.push((ACCESS_CONTROL_ALLOW_METHODS, methods));

        if !self.allow_headers.is_empty() {
            headers.push((ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone()));
        } else if let Some(requested) = req.header(ACCESS_CONTROL_REQUEST_HEADERS.as_str()).filter(|h| !h.is_empty()) {
            headers.push((ACCESS_CONTROL_ALLOW_HEADERS, requested.to_owned()));
        }

        if self.max_age > 0 {
            headers.push((ACCESS_CONTROL_MAX_AGE, self.max_age.to_string()));
        }

        Ok(CorsResult { headers, end_response: true })
    }

    /// The `Access-Control-Allow-Origin` value for `origin`, if any.
    fn resolve_origin(&self, origin: &str) -> Result<Option<String>, HttpError> {
        if let Some(approve) = &self.origin_fn {
            let allowed = approve(origin)
                .map_err(|err| HttpError::from_boxed(err, StatusCode::INTERNAL_SERVER_ERROR))?;
            return Ok(allowed.then(|| origin.to_owned()));
        }

        for allowed in &self.allow_origins {
            if allowed == "*" && self.allow_credentials && self.unsafe_wildcard {
                return Ok(Some(origin.to_owned()));
            }
            if allowed == "*" || allowed == origin {
                return Ok(Some(allowed.clone()));
            }
            if match_subdomain(origin, allowed) {
                return Ok(Some(origin.to_owned()));
            }
        }

        let pattern_match = origin.len() <= MAX_PATTERN_ORIGIN_LEN
            && origin.contains("://")
            && self.patterns.iter().any(|re| re.is_match(origin));
        Ok(pattern_match.then(|| origin.to_owned()))
    }
}

impl Middleware for Cors {
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        if self.skipper.skip(&req) {
            return next.run(req);
        }

        match self.check(&req) {
            Err(err) => {
                let mut res = self.error_handler.on_error(&req, err);
                res.append_header(VARY.as_str(), "Origin");
                Box::pin(async move { res })
            }
            Ok(result) if result.end_response => {
                let mut res = Response::status(StatusCode::NO_CONTENT);
                result.apply(&mut res);
                Box::pin(async move { res })
            }
            Ok(result) => {
                let fut = next.run(req);
                Box::pin(async move {
                    let mut res = fut.await;
                    result.apply(&mut res);
                    res
                })
            }
        }
    }
}

/// `*` matches any run of characters, `?` exactly one; everything else is
/// literal.
fn glob_to_regex(pattern: &str) -> Result<Regex, ConfigError> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{escaped}$")).map_err(|source| ConfigError::InvalidOriginPattern {
        pattern: pattern.to_owned(),
        source,
    })
}

/// Whether `origin` falls under a `scheme://*.domain` pattern.
///
/// Schemes must be equal. Host labels are compared right to left; a `*`
/// label in the pattern matches whatever remains, but only once at least one
/// more label exists in the origin, so `https://example.com` does not match
/// `https://*.example.com`.
pub fn match_subdomain(origin: &str, pattern: &str) -> bool {
    let (Some((origin_scheme, origin_auth)), Some((pattern_scheme, pattern_auth))) =
        (origin.split_once("://"), pattern.split_once("://"))
    else {
        return false;
    };
    if origin_scheme != pattern_scheme || origin_auth.len() > MAX_AUTHORITY_LEN {
        return false;
    }

    let mut pattern_labels = pattern_auth.rsplit('.');
    for label in origin_auth.rsplit('.') {
        match pattern_labels.next() {
            Some("*") => return true,
            Some(expected) if expected == label => continue,
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use proptest::prelude::*;

    use super::*;

    fn request(method: Method, origin: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        Request::from(builder.body(Bytes::new()).unwrap())
    }

    fn header<'a>(result: &'a CorsResult, name: &HeaderName) -> Option<&'a str> {
        result.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    fn policy(origins: &[&str]) -> Cors {
        Cors::new(CorsConfig {
            allow_origins: origins.iter().map(|o| (*o).to_owned()).collect(),
            ..CorsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn wildcard_without_credentials() {
        let result = policy(&["*"]).check(&request(Method::GET, Some("https://x.com"))).unwrap();
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_CREDENTIALS), None);
        assert!(!result.end_response);
    }

    #[test]
    fn wildcard_with_credentials_needs_the_unsafe_flag() {
        let mut config = CorsConfig { allow_credentials: true, ..CorsConfig::default() };
        let req = request(Method::GET, Some("https://x.com"));

        let safe = Cors::new(config.clone()).unwrap().check(&req).unwrap();
        assert_eq!(header(&safe, &ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));

        config.unsafe_wildcard_origin_with_allow_credentials = true;
        let unsafe_ = Cors::new(config).unwrap().check(&req).unwrap();
        assert_eq!(header(&unsafe_, &ACCESS_CONTROL_ALLOW_ORIGIN), Some("https://x.com"));
        assert_eq!(header(&unsafe_, &ACCESS_CONTROL_ALLOW_CREDENTIALS), Some("true"));
    }

    #[test]
    fn subdomain_patterns_respect_label_boundaries() {
        let cors = policy(&["https://*.example.com"]);
        let granted = |origin: &str| {
            let result = cors.check(&request(Method::GET, Some(origin))).unwrap();
            header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN).map(str::to_owned)
        };
        assert_eq!(granted("https://a.example.com").as_deref(), Some("https://a.example.com"));
        assert_eq!(granted("https://a.b.example.com").as_deref(), Some("https://a.b.example.com"));
        assert_eq!(granted("https://example.com"), None);
        assert_eq!(granted("https://evilexample.com"), None);
        assert_eq!(granted("http://a.example.com"), None);
    }

    #[test]
    fn glob_patterns() {
        let cors = policy(&["https://app-?.example.org", "http://localhost:*"]);
        for origin in ["https://app-1.example.org", "http://localhost:3000"] {
            let result = cors.check(&request(Method::GET, Some(origin))).unwrap();
            assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN), Some(origin));
        }
        let result = cors.check(&request(Method::GET, Some("https://app-12.example.org"))).unwrap();
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN), None);
    }

    #[test]
    fn overlong_origins_skip_pattern_matching() {
        let cors = policy(&["https://*"]);
        let long = format!("https://{}", "a".repeat(300));
        let result = cors.check(&request(Method::GET, Some(&long))).unwrap();
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN), None);
    }

    #[test]
    fn no_origin() {
        let cors = policy(&["*"]);
        let simple = cors.check(&request(Method::GET, None)).unwrap();
        assert_eq!(simple.headers, vec![(VARY, "Origin".to_owned())]);
        assert!(!simple.end_response);

        let preflight = cors.check(&request(Method::OPTIONS, None)).unwrap();
        assert!(preflight.end_response);
    }

    #[test]
    fn rejected_preflight_still_ends() {
        let cors = policy(&["https://good.com"]);
        let result = cors.check(&request(Method::OPTIONS, Some("https://bad.com"))).unwrap();
        assert!(result.end_response);
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN), None);
    }

    #[test]
    fn preflight_headers() {
        let cors = Cors::new(CorsConfig {
            allow_headers: Vec::new(),
            max_age: 600,
            ..CorsConfig::default()
        })
        .unwrap();
        let req = Request::from(
            http::Request::builder()
                .method(Method::OPTIONS)
                .header("origin", "https://x.com")
                .header("access-control-request-method", "PUT")
                .header("access-control-request-headers", "X-Custom")
                .body(Bytes::new())
                .unwrap(),
        );
        let result = cors.check(&req).unwrap();
        assert!(result.end_response);
        assert_eq!(
            header(&result, &ACCESS_CONTROL_ALLOW_METHODS),
            Some("GET,HEAD,POST,PUT,PATCH,DELETE,CONNECT,OPTIONS,TRACE"),
        );
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_HEADERS), Some("X-Custom"));
        assert_eq!(header(&result, &ACCESS_CONTROL_MAX_AGE), Some("600"));
        let vary: Vec<&str> = result.headers.iter()
            .filter(|(n, _)| *n == VARY)
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(vary, vec!["Origin", "Access-Control-Request-Method", "Access-Control-Request-Headers"]);
    }

    #[test]
    fn router_allow_is_used_without_custom_methods() {
        let mut req = request(Method::OPTIONS, Some("https://x.com"));
        req.context_mut().insert(ROUTER_ALLOW, AllowedMethods("DELETE, GET".to_owned()));

        let fallback = Cors::new(CorsConfig { allow_methods: Vec::new(), ..CorsConfig::default() }).unwrap();
        let result = fallback.check(&req).unwrap();
        assert_eq!(header(&result, &ALLOW), Some("DELETE, GET"));
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_METHODS), Some("DELETE, GET"));

        let custom = Cors::new(CorsConfig { allow_methods: vec!["GET".to_owned()], ..CorsConfig::default() }).unwrap();
        let result = custom.check(&req).unwrap();
        assert_eq!(header(&result, &ALLOW), Some("DELETE, GET"));
        assert_eq!(header(&result, &ACCESS_CONTROL_ALLOW_METHODS), Some("GET"));
    }

    #[test]
    fn expose_headers_on_simple_requests_only() {
        let cors = Cors::new(CorsConfig {
            expose_headers: vec!["X-Total".to_owned(), "X-Page".to_owned()],
            ..CorsConfig::default()
        })
        .unwrap();
        let simple = cors.check(&request(Method::GET, Some("https://x.com"))).unwrap();
        assert_eq!(header(&simple, &ACCESS_CONTROL_EXPOSE_HEADERS), Some("X-Total,X-Page"));
        let preflight = cors.check(&request(Method::OPTIONS, Some("https://x.com"))).unwrap();
        assert_eq!(header(&preflight, &ACCESS_CONTROL_EXPOSE_HEADERS), None);
    }

    #[test]
    fn origin_fn_decides_and_can_fail() {
        let cors = policy(&["*"]).allow_origin_fn(|origin: &str| match origin {
            "https://trusted.com" => Ok(true),
            "https://broken.com" => Err("lookup failed"),
            _ => Ok(false),
        });

        let ok = cors.check(&request(Method::GET, Some("https://trusted.com"))).unwrap();
        assert_eq!(header(&ok, &ACCESS_CONTROL_ALLOW_ORIGIN), Some("https://trusted.com"));

        let no = cors.check(&request(Method::GET, Some("https://other.com"))).unwrap();
        assert_eq!(header(&no, &ACCESS_CONTROL_ALLOW_ORIGIN), None);

        let err = cors.check(&request(Method::GET, Some("https://broken.com"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn match_subdomain_cases() {
        assert!(match_subdomain("https://a.example.com", "https://*.example.com"));
        assert!(!match_subdomain("https://example.com", "https://*.example.com"));
        assert!(!match_subdomain("https://a.example.com", "http://*.example.com"));
        assert!(!match_subdomain("a.example.com", "*.example.com"));
        assert!(!match_subdomain("https://a.example.com", "https://a.example.com"));
    }

    proptest! {
        #[test]
        fn check_is_idempotent(sub in "[a-z]{1,12}", preflight in any::<bool>()) {
            let cors = policy(&["https://*.example.com", "https://fixed.org"]);
            let method = if preflight { Method::OPTIONS } else { Method::GET };
            let origin = format!("https://{sub}.example.com");
            let req = request(method, Some(&origin));
            prop_assert_eq!(cors.check(&req).unwrap(), cors.check(&req).unwrap());
        }

        #[test]
        fn lookalike_domains_never_match(prefix in "[a-z]{1,12}") {
            let cors = policy(&["https://*.example.com"]);
            let origin = format!("https://{prefix}example.com");
            let result = cors.check(&request(Method::GET, Some(&origin))).unwrap();
            prop_assert!(header(&result, &ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        }
    }
}
