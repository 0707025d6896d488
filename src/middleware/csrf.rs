//! Cross-site request forgery protection (double-submit cookie).
//!
//! Every request that passes through gets a token: the one already held in
//! the CSRF cookie, or a fresh random one. Safe methods (GET, HEAD, OPTIONS,
//! TRACE) only receive the token. Any other method must echo it back through
//! the configured lookup (a form field by default), and the echoed value is
//! compared with the cookie in constant time.
//!
//! The token is exposed to handlers under [`CSRF_TOKEN`] so templates can
//! embed it; [`csrf_form_html`] renders the usual hidden input.

use std::sync::Arc;

use chrono::Utc;
use http::header::{SET_COOKIE, VARY};
use http::Method;
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::context::ContextKey;
use crate::error::ConfigError;
use crate::handler::BoxFuture;
use crate::middleware::cookie::{SameSite, SetCookie};
use crate::middleware::extractor::{ExtractError, Extractor, Source, create_extractors};
use crate::middleware::{ErrorHandler, HttpError, JsonErrorHandler, Middleware, NeverSkip, Next, Skipper};
use crate::request::Request;

/// The form field and header name clients conventionally use.
pub const CSRF_FIELD: &str = "X-CSRF-Token";

/// Where the active token is stored by default.
pub const CSRF_TOKEN: ContextKey<CsrfToken> = ContextKey::new("csrf");

/// The token in effect for the current request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CsrfToken(pub String);

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CsrfConfig {
    pub token_length: usize,
    /// Where unsafe requests must carry the token, e.g.
    /// `"header:X-CSRF-Token,form:_csrf"`.
    pub token_lookup: String,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_path: Option<String>,
    /// Seconds.
    pub cookie_max_age: i64,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    pub cookie_same_site: SameSite,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_length: 32,
            token_lookup: format!("form:{CSRF_FIELD}"),
            cookie_name: "_csrf".to_owned(),
            cookie_domain: None,
            cookie_path: None,
            cookie_max_age: 86_400,
            cookie_secure: false,
            cookie_http_only: false,
            cookie_same_site: SameSite::Default,
        }
    }
}

/// CSRF middleware.
pub struct Csrf {
    config: CsrfConfig,
    extractors: Vec<Extractor>,
    key: ContextKey<CsrfToken>,
    skipper: Arc<dyn Skipper>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl Csrf {
    /// Zero or empty settings fall back to their defaults. `SameSite=None`
    /// forces `Secure`, since browsers drop such cookies otherwise.
    pub fn new(mut config: CsrfConfig) -> Result<Self, ConfigError> {
        let defaults = CsrfConfig::default();
        if config.token_length == 0 {
            config.token_length = defaults.token_length;
        }
        if config.token_lookup.is_empty() {
            config.token_lookup = defaults.token_lookup;
        }
        if config.cookie_name.is_empty() {
            config.cookie_name = defaults.cookie_name;
        }
        if config.cookie_max_age == 0 {
            config.cookie_max_age = defaults.cookie_max_age;
        }
        if config.cookie_same_site == SameSite::None {
            config.cookie_secure = true;
        }

        let extractors = create_extractors(&config.token_lookup, None)?;
        Ok(Self {
            config,
            extractors,
            key: CSRF_TOKEN,
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

    pub fn context_key(mut self, key: ContextKey<CsrfToken>) -> Self {
        self.key = key;
        self
    }

    /// The cookie's token, or a fresh one when the cookie is absent, empty,
    /// or not something that can be sent back in `Set-Cookie` as is.
    fn current_token(&self, req: &Request) -> String {
        match req.cookie(&self.config.cookie_name) {
            Some(token) if is_cookie_value(token) => token.to_owned(),
            _ => random_token(self.config.token_length),
        }
    }

    /// Looks for a submitted copy of `token`.
    ///
    /// A submitted value that does not match wins over any source that had
    /// nothing; among missing sources the last one tried is reported.
    fn verify(&self, token: &str, req: &Request) -> Result<(), HttpError> {
        let mut last_missing = None;
        let mut mismatched = false;

        for extractor in &self.extractors {
            let candidates = match extractor.extract(req) {
                Ok(candidates) => candidates,
                Err(err) => {
                    last_missing = Some(err);
                    continue;
                }
            };
            if candidates.iter().any(|candidate| tokens_match(token, candidate)) {
                return Ok(());
            }
            mismatched = true;
        }

        if mismatched {
            return Err(HttpError::forbidden("invalid csrf token"));
        }
        Err(HttpError::bad_request(missing_message(last_missing)))
    }

    fn cookie(&self, token: &str) -> SetCookie {
        let mut cookie = SetCookie::new(&self.config.cookie_name, token)
            .lifetime(Utc::now(), self.config.cookie_max_age);
        cookie.domain = self.config.cookie_domain.clone().filter(|d| !d.is_empty());
        cookie.path = self.config.cookie_path.clone().filter(|p| !p.is_empty());
        cookie.secure = self.config.cookie_secure;
        cookie.http_only = self.config.cookie_http_only;
        cookie.same_site = self.config.cookie_same_site;
        cookie
    }
}

impl Middleware for Csrf {
    fn call(&self, mut req: Request, next: Next) -> BoxFuture {
        if self.skipper.skip(&req) {
            return next.run(req);
        }

        let token = self.current_token(&req);

        if !is_safe(req.method()) {
            if let Err(err) = self.verify(&token, &req) {
                debug!(method = %req.method(), path = req.path(), reason = %err, "csrf check failed");
                let res = self.error_handler.on_error(&req, err);
                return Box::pin(async move { res });
            }
        }

        let cookie = self.cookie(&token).to_string();
        req.context_mut().insert(self.key, CsrfToken(token));
        let fut = next.run(req);
        Box::pin(async move {
            let mut res = fut.await;
            res.append_header(SET_COOKIE.as_str(), cookie);
            res.append_header(VARY.as_str(), "Cookie");
            res
        })
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

fn tokens_match(expected: &str, submitted: &str) -> bool {
    expected.as_bytes().ct_eq(submitted.as_bytes()).into()
}

/// Non-empty and made only of RFC 6265 `cookie-octet`s.
fn is_cookie_value(token: &str) -> bool {
    !token.is_empty()
        && token.bytes().all(|b| matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E))
}

fn random_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn missing_message(err: Option<ExtractError>) -> String {
    match err {
        Some(ExtractError::Missing(Source::Query)) => "missing csrf token in the query string".to_owned(),
        Some(ExtractError::Missing(Source::Form)) => "missing csrf token in the form parameter".to_owned(),
        Some(ExtractError::Missing(Source::Header)) => "missing csrf token in request header".to_owned(),
        Some(other) => other.to_string(),
        None => "missing csrf token".to_owned(),
    }
}

/// Renders the hidden form input carrying the request's token.
///
/// Reads [`CSRF_TOKEN`]; use [`csrf_form_html_with`] when the middleware was
/// given another key through [`Csrf::context_key`]. Empty when no CSRF
/// middleware ran for this request.
pub fn csrf_form_html(req: &Request) -> String {
    csrf_form_html_with(req, CSRF_TOKEN)
}

/// [`csrf_form_html`] for a token stored under `key`.
pub fn csrf_form_html_with(req: &Request, key: ContextKey<CsrfToken>) -> String {
    let token = req.context().get(key).map(|t| t.0.as_str()).unwrap_or_default();
    format!(r#"<input type="hidden" name="{CSRF_FIELD}" value="{}">"#, escape_html(token))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
