//! Request-level errors and the default way of answering them.

use std::borrow::Cow;
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::middleware::ErrorHandler;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Any error a validator or origin function may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error that knows which status it should be answered with.
///
/// This is what every [`ErrorHandler`] receives. Validators can return one
/// directly to choose the status; other error types are wrapped with a
/// scheme-specific default.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HttpError {
    status: StatusCode,
    message: Cow<'static, str>,
    #[source]
    source: Option<BoxError>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self { status, message: message.into(), source: None }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Keeps an `HttpError` as is; wraps anything else with `status`.
    pub fn from_boxed(err: BoxError, status: StatusCode) -> Self {
        match err.downcast::<HttpError>() {
            Ok(http) => *http,
            Err(other) => Self { status, message: other.to_string().into(), source: Some(other) },
        }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        json_error(self.status, &self.message)
    }
}

/// Localises an error message before it is rendered.
pub type Translator = dyn Fn(&HttpError) -> String + Send + Sync;

/// Renders `{"code": <status>, "message": <text>}` with the error's status.
///
/// A [`Translator`] can be injected to rewrite messages, e.g. per locale.
#[derive(Clone, Default)]
pub struct JsonErrorHandler {
    translator: Option<Arc<Translator>>,
}

impl JsonErrorHandler {
    pub fn new() -> Self { Self::default() }

    pub fn with_translator<F>(translator: F) -> Self
    where
        F: Fn(&HttpError) -> String + Send + Sync + 'static,
    {
        Self { translator: Some(Arc::new(translator)) }
    }
}

impl ErrorHandler for JsonErrorHandler {
    fn on_error(&self, _req: &Request, err: HttpError) -> Response {
        match &self.translator {
            Some(translate) => json_error(err.status, &translate(&err)),
            None => err.into_response(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: u16,
    message: &'a str,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::to_vec(&ErrorBody { code: status.as_u16(), message }).unwrap_or_default();
    Response::builder().status(status).json(body)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn request() -> Request {
        Request::from(http::Request::new(Bytes::new()))
    }

    #[test]
    fn from_boxed_keeps_http_errors() {
        let boxed: BoxError = Box::new(HttpError::forbidden("nope"));
        let err = HttpError::from_boxed(boxed, StatusCode::UNAUTHORIZED);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.message(), "nope");
    }

    #[test]
    fn from_boxed_wraps_other_errors() {
        let boxed: BoxError = "key revoked".into();
        let err = HttpError::from_boxed(boxed, StatusCode::UNAUTHORIZED);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.message(), "key revoked");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn json_handler_renders_code_and_message() {
        let res = JsonErrorHandler::new().on_error(&request(), HttpError::bad_request("missing"));
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, serde_json::json!({"code": 400, "message": "missing"}));
    }

    #[test]
    fn translator_rewrites_message_only() {
        let handler = JsonErrorHandler::with_translator(|err: &HttpError| format!("[de] {}", err.message()));
        let res = handler.on_error(&request(), HttpError::forbidden("invalid csrf token"));
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["message"], "[de] invalid csrf token");
    }
}
