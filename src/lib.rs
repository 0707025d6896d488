//! # bulwark
//!
//! Request-security middleware for HTTP services, on a small hyper-based
//! framework.
//!
//! ## What it guards
//!
//! - **CORS**: origin negotiation with exact, wildcard, subdomain and glob
//!   origins, and preflight answers that never reach your handlers
//! - **CSRF**: double-submit cookie tokens, compared in constant time
//! - **Basic, API-key and JWT authentication**: one extract → validate →
//!   accept/reject [`Guard`](middleware::guard::Guard), three validators
//! - **Secure headers**: XSS filter, nosniff, framing, HSTS, CSP
//!
//! Credentials are located through lookup strings such as
//! `"header:Authorization:Bearer ,cookie:session"`; see
//! [`middleware::extractor`].
//!
//! ## The contract
//!
//! TLS and rate limiting stay with the reverse proxy; request bodies are
//! capped by [`Server::body_limit`]. Every middleware is built once at
//! startup, fails then if misconfigured ([`ConfigError`]), and is only read
//! afterwards. What a middleware learns
//! about a request (identity, CSRF token) travels in the request's typed
//! [`Context`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bulwark::middleware::cors::{Cors, CorsConfig};
//! use bulwark::middleware::csrf::{Csrf, CsrfConfig};
//! use bulwark::middleware::key_auth::{API_KEY, KeyAuth, KeyAuthConfig};
//! use bulwark::middleware::HttpError;
//! use bulwark::{Request, Response, Router, Server};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bulwark::Error> {
//!     let keys = KeyAuth::new(KeyAuthConfig::default(), |key: &str, _req: &Request| {
//!         Ok::<_, HttpError>(key == "let-me-in")
//!     })?;
//!
//!     let app = Router::new()
//!         .on(Method::GET, "/reports/{id}", report)
//!         .layer(Cors::new(CorsConfig {
//!             allow_origins: vec!["https://*.example.com".into()],
//!             ..CorsConfig::default()
//!         })?)
//!         .layer(Csrf::new(CsrfConfig::default())?)
//!         .layer(keys);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn report(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     let owner = req.context().get(API_KEY).map(|k| k.0.as_str()).unwrap_or("nobody");
//!     Response::text(format!("report {id} for {owner}"))
//! }
//! ```

mod context;
mod error;
mod handler;
mod multipart;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use context::{Context, ContextKey};
pub use error::{ConfigError, Error};
pub use handler::{BoxFuture, Handler};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{AllowedMethods, ROUTER_ALLOW, Router};
pub use server::{DEFAULT_BODY_LIMIT, Server};
