//! JSON Web Token authentication.
//!
//! The token is looked up like any other credential (`Authorization: Bearer
//! <jwt>` by default) and verified with [`jsonwebtoken`]. The header's `alg`
//! must equal the configured signing method. With a key set, the header's
//! `kid` picks the key; otherwise the single key is used. A custom parse
//! function replaces all of that.
//!
//! The accepted [`TokenData`] is stored in the request context:
//!
//! ```rust
//! use bulwark::middleware::jwt::{Jwt, JwtConfig, JWT_USER};
//! use bulwark::Request;
//! use jsonwebtoken::DecodingKey;
//!
//! let auth: Jwt = Jwt::new(JwtConfig::default(), DecodingKey::from_secret(b"secret")).unwrap();
//!
//! async fn me(req: Request) -> String {
//!     req.context()
//!         .get(JWT_USER)
//!         .and_then(|token| token.claims["sub"].as_str().map(str::to_owned))
//!         .unwrap_or_default()
//! }
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode, decode_header};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::context::ContextKey;
use crate::error::ConfigError;
use crate::middleware::extractor::create_extractors;
use crate::middleware::guard::{Guard, Rejection, Validator};
use crate::middleware::{BoxError, HttpError};
use crate::request::Request;

/// Where accepted tokens with untyped claims are stored.
pub const JWT_USER: ContextKey<TokenData<serde_json::Value>> = jwt_user_key();

/// The default context key for tokens with claims of type `C`.
pub const fn jwt_user_key<C>() -> ContextKey<TokenData<C>> {
    ContextKey::new("user")
}

const DEFAULT_LOOKUP: &str = "header:Authorization";
const DEFAULT_SCHEME: &str = "Bearer";
const DEFAULT_SIGNING_METHOD: &str = "HS256";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct JwtConfig {
    pub token_lookup: String,
    pub auth_scheme: String,
    /// `HS256`, `RS256`, `ES256`, ... Tokens signed otherwise are refused.
    pub signing_method: String,
    /// Checked against `iss` when set.
    pub issuer: Option<String>,
    /// Checked against `aud` when set.
    pub audience: Option<String>,
    /// Seconds of clock skew tolerated for `exp` and `nbf`.
    pub leeway: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            token_lookup: DEFAULT_LOOKUP.to_owned(),
            auth_scheme: DEFAULT_SCHEME.to_owned(),
            signing_method: DEFAULT_SIGNING_METHOD.to_owned(),
            issuer: None,
            audience: None,
            leeway: 0,
        }
    }
}

/// Replaces the built-in verification entirely.
pub type ParseFn<C> = dyn Fn(&str, &Request) -> Result<TokenData<C>, BoxError> + Send + Sync;

enum Keys<C> {
    Single(DecodingKey),
    ById(HashMap<String, DecodingKey>),
    Parse(Arc<ParseFn<C>>),
}

pub struct JwtValidator<C> {
    algorithm: Algorithm,
    keys: Keys<C>,
    validation: Validation,
    claims: PhantomData<fn() -> C>,
}

impl<C> JwtValidator<C> {
    fn build(config: &JwtConfig, keys: Keys<C>) -> Result<Self, ConfigError> {
        let method = if config.signing_method.is_empty() {
            DEFAULT_SIGNING_METHOD
        } else {
            config.signing_method.as_str()
        };
        let algorithm = Algorithm::from_str(method)
            .map_err(|_| ConfigError::UnsupportedAlgorithm(method.to_owned()))?;

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_nbf = true;
        validation.leeway = config.leeway;
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self { algorithm, keys, validation, claims: PhantomData })
    }
}

impl<C> Validator for JwtValidator<C>
where
    C: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Identity = TokenData<C>;

    fn validate(&self, candidate: &str, req: &Request) -> Result<TokenData<C>, BoxError> {
        let key = match &self.keys {
            Keys::Parse(parse) => return parse(candidate, req),
            Keys::Single(key) => {
                self.check_algorithm(candidate)?;
                key
            }
            Keys::ById(keys) => {
                let kid = self.check_algorithm(candidate)?;
                kid.as_deref()
                    .and_then(|kid| keys.get(kid))
                    .ok_or_else(|| format!("unexpected jwt key id={kid:?}"))?
            }
        };
        Ok(decode::<C>(candidate, key, &self.validation)?)
    }
}

impl<C> JwtValidator<C> {
    /// Returns the header's `kid` once `alg` is known to be acceptable.
    fn check_algorithm(&self, token: &str) -> Result<Option<String>, BoxError> {
        let header = decode_header(token)?;
        if header.alg != self.algorithm {
            return Err(format!("unexpected jwt signing method={:?}", header.alg).into());
        }
        Ok(header.kid)
    }
}

/// JWT middleware. Claims default to an untyped JSON object.
pub type Jwt<C = serde_json::Value> = Guard<JwtValidator<C>>;

impl<C> Guard<JwtValidator<C>>
where
    C: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Verifies every token with `key`.
    pub fn new(config: JwtConfig, key: DecodingKey) -> Result<Self, ConfigError> {
        Self::assemble(&config, Keys::Single(key))
    }

    /// Verifies tokens with the key named by their `kid` header. Tokens
    /// without a known `kid` are refused.
    pub fn with_key_set(config: JwtConfig, keys: HashMap<String, DecodingKey>) -> Result<Self, ConfigError> {
        if keys.is_empty() {
            return Err(ConfigError::MissingSigningKey);
        }
        Self::assemble(&config, Keys::ById(keys))
    }

    /// Hands every candidate to `parse`, e.g. to verify against a remote
    /// identity provider.
    pub fn with_parser<F>(config: JwtConfig, parse: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str, &Request) -> Result<TokenData<C>, BoxError> + Send + Sync + 'static,
    {
        Self::assemble(&config, Keys::Parse(Arc::new(parse)))
    }

    fn assemble(config: &JwtConfig, keys: Keys<C>) -> Result<Self, ConfigError> {
        let lookup = if config.token_lookup.is_empty() { DEFAULT_LOOKUP } else { &config.token_lookup };
        let scheme = if config.auth_scheme.is_empty() { DEFAULT_SCHEME } else { &config.auth_scheme };
        let extractors = create_extractors(lookup, Some(scheme))?;
        let validator = JwtValidator::build(config, keys)?;
        Ok(Guard::from_parts(extractors, validator, jwt_user_key(), describe))
    }
}

fn describe(rejection: Rejection) -> HttpError {
    match rejection {
        Rejection::Missing(_) => HttpError::bad_request("missing or malformed jwt"),
        Rejection::Invalid(err) => match err.downcast::<HttpError>() {
            Ok(http) => *http,
            Err(other) => HttpError::unauthorized("invalid or expired jwt").with_source(other),
        },
    }
}
