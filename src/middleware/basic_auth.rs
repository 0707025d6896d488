//! HTTP Basic authentication.
//!
//! Reads `Authorization: Basic <base64(user:password)>` and hands the decoded
//! pair to a caller-supplied check. Any failure is answered with
//! `401 Unauthorized` and a `WWW-Authenticate` challenge.
//!
//! ```rust
//! use bulwark::middleware::basic_auth::{BasicAuth, BasicAuthConfig};
//! use bulwark::Request;
//!
//! let auth = BasicAuth::new(BasicAuthConfig::default(), |user: &str, password: &str, _req: &Request| {
//!     user == "admin" && password == "hunter2"
//! });
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use serde::Deserialize;

use crate::context::ContextKey;
use crate::middleware::extractor::Extractor;
use crate::middleware::guard::{Guard, Rejection, Validator};
use crate::middleware::{BoxError, ErrorHandler, HttpError};
use crate::request::Request;
use crate::response::Response;

const DEFAULT_REALM: &str = "Restricted";
const BASIC_PREFIX: &str = "Basic ";

/// Where an accepted [`BasicIdentity`] is stored by default.
pub const BASIC_AUTH_USER: ContextKey<BasicIdentity> = ContextKey::new("basic_auth");

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct BasicAuthConfig {
    /// Sent in the `WWW-Authenticate` challenge.
    pub realm: String,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self { realm: DEFAULT_REALM.to_owned() }
    }
}

/// The user a request authenticated as.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicIdentity {
    pub username: String,
}

/// Decodes a Basic credential and asks `F` whether it is acceptable.
pub struct BasicValidator<F> {
    check: F,
}

impl<F> Validator for BasicValidator<F>
where
    F: Fn(&str, &str, &Request) -> bool + Send + Sync + 'static,
{
    type Identity = BasicIdentity;

    fn validate(&self, candidate: &str, req: &Request) -> Result<BasicIdentity, BoxError> {
        let decoded = STANDARD.decode(candidate)?;
        let decoded = String::from_utf8(decoded)?;
        let Some((user, password)) = decoded.split_once(':') else {
            return Err(HttpError::unauthorized("malformed basic credentials").into());
        };
        if !(self.check)(user, password, req) {
            return Err(HttpError::unauthorized("invalid basic credentials").into());
        }
        Ok(BasicIdentity { username: user.to_owned() })
    }
}

/// Basic authentication middleware.
pub type BasicAuth<F> = Guard<BasicValidator<F>>;

impl<F> Guard<BasicValidator<F>>
where
    F: Fn(&str, &str, &Request) -> bool + Send + Sync + 'static,
{
    pub fn new(config: BasicAuthConfig, check: F) -> Self {
        let extractors = vec![Extractor::header(AUTHORIZATION, BASIC_PREFIX)];
        Guard::from_parts(extractors, BasicValidator { check }, BASIC_AUTH_USER, unauthorized)
            .error_handler(Challenge::new(&config.realm))
    }
}

fn unauthorized(rejection: Rejection) -> HttpError {
    match rejection {
        Rejection::Invalid(err) => HttpError::from_boxed(err, StatusCode::UNAUTHORIZED),
        Rejection::Missing(err) => HttpError::unauthorized(err.to_string()),
    }
}

/// The default error handler: an empty `401` carrying the realm challenge.
#[derive(Clone, Debug)]
pub struct Challenge {
    header: String,
}

impl Challenge {
    pub fn new(realm: &str) -> Self {
        let realm = match realm {
            "" | DEFAULT_REALM => DEFAULT_REALM.to_owned(),
            custom => format!("{custom:?}"),
        };
        Self { header: format!("basic realm={realm}") }
    }
}

impl ErrorHandler for Challenge {
    fn on_error(&self, _req: &Request, _err: HttpError) -> Response {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(WWW_AUTHENTICATE.as_str(), &self.header)
            .no_body()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;

    use super::*;
    use crate::middleware::extractor::Source;
    use crate::router::Router;

    fn router(config: BasicAuthConfig) -> Router {
        Router::new()
            .on(Method::GET, "/", |req: Request| async move {
                let user = req.context().get(BASIC_AUTH_USER).map(|id| id.username.clone());
                Response::text(user.unwrap_or_default())
            })
            .layer(BasicAuth::new(config, |user: &str, password: &str, _req: &Request| {
                user == "joe" && password == "secret:with:colons"
            }))
    }

    fn request(authorization: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        Request::from(builder.body(Bytes::new()).unwrap())
    }

    fn encode(raw: &str) -> String {
        format!("Basic {}", STANDARD.encode(raw))
    }

    #[tokio::test]
    async fn valid_credentials_pass() {
        let res = router(BasicAuthConfig::default())
            .handle(request(Some(&encode("joe:secret:with:colons"))))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"joe");
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let header = encode("joe:secret:with:colons").replacen("Basic", "bAsIc", 1);
        let res = router(BasicAuthConfig::default()).handle(request(Some(&header))).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn failures_get_the_challenge() {
        for header in [None, Some("Basic"), Some("Basic !!!"), Some("Bearer abc")] {
            let res = router(BasicAuthConfig::default()).handle(request(header)).await;
            assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(res.header("www-authenticate"), Some("basic realm=Restricted"));
        }

        let wrong = encode("joe:nope");
        let res = router(BasicAuthConfig::default()).handle(request(Some(&wrong))).await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
        assert!(res.body().is_empty());
    }

    #[test]
    fn reads_only_the_authorization_header() {
        let auth = BasicAuth::new(BasicAuthConfig::default(), |_: &str, _: &str, _: &Request| true);
        let extractors = auth.extractors();
        assert_eq!(extractors.len(), 1);
        assert_eq!(extractors[0].source(), Source::Header);
        assert_eq!(extractors[0].name(), "authorization");
        assert_eq!(extractors[0].prefix(), "Basic ");
    }

    #[tokio::test]
    async fn custom_realm_is_quoted() {
        let config = BasicAuthConfig { realm: "Admin Area".to_owned() };
        let res = router(config).handle(request(None)).await;
        assert_eq!(res.header("www-authenticate"), Some("basic realm=\"Admin Area\""));
    }
}
