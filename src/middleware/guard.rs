//! The extract → validate → accept/reject shape shared by every
//! credential-based middleware.
//!
//! A [`Guard`] holds an ordered extractor chain and a [`Validator`]. Per
//! request it tries every candidate of every extractor until one validates.
//! The winning identity is stored in the request's [`Context`](crate::Context)
//! under the guard's key; otherwise the error handler answers and the chain
//! stops.
//!
//! [`basic_auth`](super::basic_auth), [`key_auth`](super::key_auth) and
//! [`jwt`](super::jwt) are guards with a scheme-specific validator. A guard
//! can also be built directly:
//!
//! ```rust
//! use bulwark::middleware::extractor::create_extractors;
//! use bulwark::middleware::guard::{Guard, Rejection};
//! use bulwark::middleware::HttpError;
//! use bulwark::{ContextKey, Request};
//!
//! const TENANT: ContextKey<String> = ContextKey::new("tenant");
//!
//! let guard = Guard::from_parts(
//!     create_extractors("header:X-Tenant,query:tenant", None).unwrap(),
//!     |candidate: &str, _req: &Request| -> Result<String, HttpError> {
//!         match candidate {
//!             "acme" | "globex" => Ok(candidate.to_owned()),
//!             _ => Err(HttpError::forbidden("unknown tenant")),
//!         }
//!     },
//!     TENANT,
//!     Rejection::into_http_error,
//! );
//! ```

use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use crate::context::ContextKey;
use crate::handler::BoxFuture;
use crate::middleware::extractor::{ExtractError, Extractor, Source};
use crate::middleware::{
    BoxError, ErrorHandler, HttpError, JsonErrorHandler, Middleware, NeverSkip, Next, Skipper,
    SuccessHandler,
};
use crate::request::Request;

/// Checks one candidate credential.
///
/// Implemented for closures `Fn(&str, &Request) -> Result<I, E>` where `E`
/// converts into a [`BoxError`]. Return an [`HttpError`] to choose the status
/// the client sees.
pub trait Validator: Send + Sync + 'static {
    type Identity: Send + Sync + 'static;

    fn validate(&self, candidate: &str, req: &Request) -> Result<Self::Identity, BoxError>;
}

impl<F, I, E> Validator for F
where
    F: Fn(&str, &Request) -> Result<I, E> + Send + Sync + 'static,
    I: Send + Sync + 'static,
    E: Into<BoxError>,
{
    type Identity = I;

    fn validate(&self, candidate: &str, req: &Request) -> Result<I, BoxError> {
        self(candidate, req).map_err(Into::into)
    }
}

/// Why a guard turned a request away.
#[derive(Debug)]
pub enum Rejection {
    /// At least one candidate reached the validator and was refused. The
    /// last refusal is kept.
    Invalid(BoxError),
    /// No extractor produced a candidate. The last extractor's error is kept.
    Missing(ExtractError),
}

impl Rejection {
    /// Scheme-neutral mapping: validator errors become `401` unless they
    /// already are an [`HttpError`], missing credentials become `400`.
    pub fn into_http_error(self) -> HttpError {
        match self {
            Self::Invalid(err) => HttpError::from_boxed(err, StatusCode::UNAUTHORIZED),
            Self::Missing(err) => HttpError::bad_request(err.to_string()),
        }
    }
}

/// Turns a [`Rejection`] into what the error handler receives.
pub type Describe = fn(Rejection) -> HttpError;

/// A credential-checking middleware.
pub struct Guard<V: Validator> {
    extractors: Vec<Extractor>,
    validator: V,
    key: ContextKey<V::Identity>,
    describe: Describe,
    skipper: Arc<dyn Skipper>,
    error_handler: Arc<dyn ErrorHandler>,
    success_handler: Option<Arc<dyn SuccessHandler>>,
}

impl<V: Validator> Guard<V> {
    /// Assembles a guard from its parts. Defaults: never skip, JSON error
    /// responses, no success hook.
    pub fn from_parts(
        extractors: Vec<Extractor>,
        validator: V,
        key: ContextKey<V::Identity>,
        describe: Describe,
    ) -> Self {
        Self {
            extractors,
            validator,
            key,
            describe,
            skipper: Arc::new(NeverSkip),
            error_handler: Arc::new(JsonErrorHandler::new()),
            success_handler: None,
        }
    }

    pub fn skipper(mut self, skipper: impl Skipper) -> Self {
        self.skipper = Arc::new(skipper);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn on_success(mut self, handler: impl SuccessHandler) -> Self {
        self.success_handler = Some(Arc::new(handler));
        self
    }

    /// Stores the identity under `key` instead of the scheme's default.
    pub fn context_key(mut self, key: ContextKey<V::Identity>) -> Self {
        self.key = key;
        self
    }

    pub fn key(&self) -> ContextKey<V::Identity> { self.key }

    pub fn extractors(&self) -> &[Extractor] { &self.extractors }

    /// Runs the extractor chain and validator without touching the request.
    ///
    /// Every candidate of every extractor is tried in order; the first one
    /// the validator accepts wins. If none does, a validator refusal is
    /// reported ahead of any extraction error.
    pub fn authenticate(&self, req: &Request) -> Result<V::Identity, Rejection> {
        let mut last_missing = None;
        let mut last_refusal = None;

        for extractor in &self.extractors {
            let candidates = match extractor.extract(req) {
                Ok(candidates) => candidates,
                Err(err) => {
                    last_missing = Some(err);
                    continue;
                }
            };
            for candidate in &candidates {
                match self.validator.validate(candidate, req) {
                    Ok(identity) => return Ok(identity),
                    Err(err) => last_refusal = Some(err),
                }
            }
        }

        Err(match (last_refusal, last_missing) {
            (Some(err), _) => Rejection::Invalid(err),
            (None, Some(err)) => Rejection::Missing(err),
            (None, None) => Rejection::Missing(ExtractError::Missing(Source::Header)),
        })
    }
}

impl<V: Validator> Middleware for Guard<V> {
    fn call(&self, mut req: Request, next: Next) -> BoxFuture {
        if self.skipper.skip(&req) {
            return next.run(req);
        }

        match self.authenticate(&req) {
            Ok(identity) => {
                req.context_mut().insert(self.key, identity);
                if let Some(handler) = &self.success_handler {
                    handler.on_success(&mut req);
                }
                next.run(req)
            }
            Err(rejection) => {
                let err = (self.describe)(rejection);
                debug!(
                    key = self.key.name(),
                    status = err.status().as_u16(),
                    reason = %err,
                    "request rejected by guard",
                );
                let res = self.error_handler.on_error(&req, err);
                Box::pin(async move { res })
            }
        }
    }
}
