//! Middleware layer.
//!
//! A middleware sees the request before the endpoint and the response after
//! it. It either calls [`Next::run`] to continue, or returns a response of
//! its own to abort the chain. Nothing behind an aborting middleware runs.
//!
//! Built-in middleware:
//! - [`cors::Cors`]: origin negotiation and preflight answers
//! - [`csrf::Csrf`]: anti-forgery token issue and validation
//! - [`guard::Guard`]: extract → validate → accept/reject, shared by
//!   [`basic_auth`], [`key_auth`] and [`jwt`]
//! - [`secure::Secure`]: XSS/framing/HSTS/CSP response headers
//!
//! All of them are built once at startup, validated then, and afterwards only
//! read. Per-request state lives in locals and in the request's
//! [`Context`](crate::Context).
//!
//! The per-request hooks are small traits ([`Skipper`], [`ErrorHandler`],
//! [`SuccessHandler`]), each implemented for plain closures:
//!
//! ```rust
//! use bulwark::middleware::{cors::{Cors, CorsConfig}, Skipper};
//! use bulwark::Request;
//!
//! let cors = Cors::new(CorsConfig::default())
//!     .unwrap()
//!     .skipper(|req: &Request| req.path().starts_with("/internal/"));
//! ```

pub mod basic_auth;
pub mod cookie;
pub mod cors;
pub mod csrf;
pub mod error;
pub mod extractor;
pub mod guard;
pub mod jwt;
pub mod key_auth;
pub mod secure;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler};
use crate::request::Request;
use crate::response::Response;

pub use error::{BoxError, HttpError, JsonErrorHandler};

/// One link of the request chain.
///
/// Implemented for any `Fn(Request, Next) -> impl Future<Output = Response>`.
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture;
}

impl<F, Fut> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin(self(req, next))
    }
}

pub(crate) type BoxedMiddleware = Arc<dyn Middleware>;

/// The remainder of the chain, handed to each middleware.
pub struct Next {
    chain: Arc<[BoxedMiddleware]>,
    index: usize,
    endpoint: BoxedHandler,
}

impl Next {
    pub(crate) fn new(chain: Arc<[BoxedMiddleware]>, endpoint: BoxedHandler) -> Self {
        Self { chain, index: 0, endpoint }
    }

    /// Runs the rest of the chain and then the endpoint.
    pub fn run(self, req: Request) -> BoxFuture {
        match self.chain.get(self.index).cloned() {
            Some(middleware) => {
                let next = Self { index: self.index + 1, ..self };
                middleware.call(req, next)
            }
            None => self.endpoint.call(req),
        }
    }
}

// ── Hooks ─────────────────────────────────────────────────────────────────────

/// Decides per request whether a middleware applies at all.
pub trait Skipper: Send + Sync + 'static {
    fn skip(&self, req: &Request) -> bool;
}

impl<F> Skipper for F
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    fn skip(&self, req: &Request) -> bool { self(req) }
}

/// The default skipper: the middleware always applies.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverSkip;

impl Skipper for NeverSkip {
    fn skip(&self, _req: &Request) -> bool { false }
}

/// Produces the client-visible response for a rejected request. The chain is
/// aborted after it returns.
pub trait ErrorHandler: Send + Sync + 'static {
    fn on_error(&self, req: &Request, err: HttpError) -> Response;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Request, HttpError) -> Response + Send + Sync + 'static,
{
    fn on_error(&self, req: &Request, err: HttpError) -> Response { self(req, err) }
}

/// Runs after a credential was accepted and stored, before the chain
/// continues.
pub trait SuccessHandler: Send + Sync + 'static {
    fn on_success(&self, req: &mut Request);
}

impl<F> SuccessHandler for F
where
    F: Fn(&mut Request) + Send + Sync + 'static,
{
    fn on_success(&self, req: &mut Request) { self(req) }
}
