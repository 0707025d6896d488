//! API-key authentication.
//!
//! Keys are found through a lookup string (`"header:Authorization"` with the
//! `Bearer` scheme by default) and checked by a caller-supplied function
//! returning `Result<bool, E>`:
//!
//! - `Ok(true)` accepts the key; it is stored as [`ApiKey`].
//! - `Ok(false)` refuses it with `401 invalid key`.
//! - `Err(e)` refuses it with `e` (`401` unless `e` is an [`HttpError`]).
//!
//! A request carrying no key at all gets `400` naming where the key was
//! looked for last.

use std::convert::Infallible;

use http::StatusCode;
use serde::Deserialize;

use crate::context::ContextKey;
use crate::error::ConfigError;
use crate::middleware::extractor::{ExtractError, Source, create_extractors};
use crate::middleware::guard::{Guard, Rejection, Validator};
use crate::middleware::{BoxError, HttpError};
use crate::request::Request;

/// Where an accepted [`ApiKey`] is stored by default.
pub const API_KEY: ContextKey<ApiKey> = ContextKey::new("key");

const DEFAULT_LOOKUP: &str = "header:Authorization";
const DEFAULT_SCHEME: &str = "Bearer";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct KeyAuthConfig {
    /// Where to look for the key, e.g. `"header:X-Api-Key,query:api_key"`.
    pub key_lookup: String,
    /// Prefix expected in front of the key in the `Authorization` header.
    pub auth_scheme: String,
}

impl Default for KeyAuthConfig {
    fn default() -> Self {
        Self {
            key_lookup: DEFAULT_LOOKUP.to_owned(),
            auth_scheme: DEFAULT_SCHEME.to_owned(),
        }
    }
}

/// A key that passed validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiKey(pub String);

pub struct KeyValidator<F> {
    check: F,
}

impl<F, E> Validator for KeyValidator<F>
where
    F: Fn(&str, &Request) -> Result<bool, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    type Identity = ApiKey;

    fn validate(&self, candidate: &str, req: &Request) -> Result<ApiKey, BoxError> {
        match (self.check)(candidate, req) {
            Ok(true) => Ok(ApiKey(candidate.to_owned())),
            Ok(false) => Err(HttpError::unauthorized("invalid key").into()),
            Err(err) => Err(err.into()),
        }
    }
}

/// API-key middleware.
pub type KeyAuth<F> = Guard<KeyValidator<F>>;

impl<F, E> Guard<KeyValidator<F>>
where
    F: Fn(&str, &Request) -> Result<bool, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    /// Fails when `key_lookup` cannot be parsed. Empty fields fall back to
    /// their defaults.
    pub fn new(config: KeyAuthConfig, check: F) -> Result<Self, ConfigError> {
        let lookup = non_empty(&config.key_lookup, DEFAULT_LOOKUP);
        let scheme = non_empty(&config.auth_scheme, DEFAULT_SCHEME);
        let extractors = create_extractors(lookup, Some(scheme))?;
        Ok(Guard::from_parts(extractors, KeyValidator { check }, API_KEY, describe))
    }
}

/// Key-auth with a plain predicate, for checks that cannot fail.
pub fn key_auth<P>(
    config: KeyAuthConfig,
    predicate: P,
) -> Result<KeyAuth<impl Fn(&str, &Request) -> Result<bool, Infallible> + Send + Sync + 'static>, ConfigError>
where
    P: Fn(&str) -> bool + Send + Sync + 'static,
{
    KeyAuth::new(config, move |key: &str, _req: &Request| Ok::<_, Infallible>(predicate(key)))
}

fn non_empty<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() { default } else { value }
}

fn describe(rejection: Rejection) -> HttpError {
    match rejection {
        Rejection::Invalid(err) => HttpError::from_boxed(err, StatusCode::UNAUTHORIZED),
        Rejection::Missing(err) => HttpError::bad_request(missing_message(err)),
    }
}

fn missing_message(err: ExtractError) -> &'static str {
    match err {
        ExtractError::Missing(Source::Query) => "missing key in the query string",
        ExtractError::Missing(Source::Cookie) => "missing key in cookies",
        ExtractError::Missing(Source::Form) => "missing key in the form",
        ExtractError::Missing(Source::Param) => "missing key in path params",
        ExtractError::Missing(Source::Header) => "missing key in request header",
        ExtractError::Invalid(_) => "invalid key in the request header",
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;

    use super::*;
    use crate::response::Response;
    use crate::router::Router;

    fn router(config: KeyAuthConfig) -> Router {
        let auth = KeyAuth::new(config, |key: &str, _req: &Request| match key {
            "valid-key" => Ok(true),
            "revoked" => Err(HttpError::forbidden("key revoked")),
            _ => Ok(false),
        })
        .unwrap();

        Router::new()
            .on(Method::GET, "/", |req: Request| async move {
                let key = req.context().get(API_KEY).map(|k| k.0.clone());
                Response::text(key.unwrap_or_default())
            })
            .layer(auth)
    }

    fn request(builder: http::request::Builder) -> Request {
        Request::from(builder.body(Bytes::new()).unwrap())
    }

    async fn message(res: Response) -> String {
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        body["message"].as_str().unwrap_or_default().to_owned()
    }

    #[tokio::test]
    async fn bearer_key_is_accepted() {
        let res = router(KeyAuthConfig::default())
            .handle(request(http::Request::builder().uri("/").header("authorization", "Bearer valid-key")))
            .await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"valid-key");
    }

    #[tokio::test]
    async fn refused_key_is_401() {
        let res = router(KeyAuthConfig::default())
            .handle(request(http::Request::builder().uri("/").header("authorization", "Bearer other")))
            .await;
        assert_eq!(res.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(message(res).await, "invalid key");
    }

    #[tokio::test]
    async fn validator_error_keeps_its_status() {
        let res = router(KeyAuthConfig::default())
            .handle(request(http::Request::builder().uri("/").header("authorization", "Bearer revoked")))
            .await;
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(message(res).await, "key revoked");
    }

    #[tokio::test]
    async fn missing_key_names_the_source() {
        let res = router(KeyAuthConfig::default())
            .handle(request(http::Request::builder().uri("/")))
            .await;
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(message(res).await, "missing key in request header");

        let res = router(KeyAuthConfig::default())
            .handle(request(http::Request::builder().uri("/").header("authorization", "Basic xyz")))
            .await;
        assert_eq!(message(res).await, "invalid key in the request header");

        let query = KeyAuthConfig { key_lookup: "query:api_key".to_owned(), ..KeyAuthConfig::default() };
        let res = router(query).handle(request(http::Request::builder().uri("/"))).await;
        assert_eq!(message(res).await, "missing key in the query string");
    }

    #[tokio::test]
    async fn predicate_helper() {
        let auth = key_auth(
            KeyAuthConfig { key_lookup: "header:X-Api-Key".to_owned(), ..KeyAuthConfig::default() },
            |key| key == "k1",
        )
        .unwrap();
        let router = Router::new().on(Method::GET, "/", |_req: Request| async { "ok" }).layer(auth);

        let res = router.handle(request(http::Request::builder().uri("/").header("x-api-key", "k1"))).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[test]
    fn bad_lookup_fails_construction() {
        let config = KeyAuthConfig { key_lookup: "session:key".to_owned(), ..KeyAuthConfig::default() };
        let built = KeyAuth::new(config, |_key: &str, _req: &Request| Ok::<_, Infallible>(true));
        assert!(matches!(built, Err(ConfigError::UnknownSource { .. })));
    }
}
