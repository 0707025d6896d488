//! Radix-tree request router with a global middleware chain.
//!
//! One tree per HTTP method. O(path-length) lookup. Every request, whether a
//! route matched or not, passes through the middleware registered with
//! [`Router::layer`], so CORS can answer a preflight for a path that has no
//! `OPTIONS` handler.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::context::ContextKey;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{BoxedMiddleware, Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Methods registered for a path that matched, but not under the request's
/// method. Comma-separated, ready to be sent as an `Allow` header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllowedMethods(pub String);

/// Where the router leaves [`AllowedMethods`] for the middleware chain.
///
/// Set only when the path is known under other methods; the request then
/// ends in `405 Method Not Allowed` unless a middleware answers first.
pub const ROUTER_ALLOW: ContextKey<AllowedMethods> = ContextKey::new("router_allow");

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    middleware: Arc<[BoxedMiddleware]>,
    not_found: BoxedHandler,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            middleware: Vec::<BoxedMiddleware>::new().into(),
            not_found: not_found.into_boxed_handler(),
        }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax: `req.param("name")` retrieves them:
    ///
    /// ```rust
    /// # use bulwark::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Appends a middleware to the chain. The first one registered runs
    /// first and sees the response last.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        let mut chain: Vec<BoxedMiddleware> = self.middleware.iter().cloned().collect();
        chain.push(Arc::new(middleware));
        self.middleware = chain.into();
        self
    }

    /// Runs one request through the middleware chain and its endpoint.
    pub async fn handle(&self, mut req: Request) -> Response {
        let endpoint = self.resolve(&mut req);
        Next::new(Arc::clone(&self.middleware), endpoint).run(req).await
    }

    fn resolve(&self, req: &mut Request) -> BoxedHandler {
        if let Some((handler, params)) = self.lookup(req.method(), req.path()) {
            req.set_params(params);
            return handler;
        }

        let allowed = self.allowed_methods(req.path());
        if allowed.is_empty() {
            return Arc::clone(&self.not_found);
        }
        let allow = allowed.join(", ");
        req.context_mut().insert(ROUTER_ALLOW, AllowedMethods(allow.clone()));
        method_not_allowed(allow)
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    /// Sorted so the `Allow` value is stable across runs.
    fn allowed_methods(&self, path: &str) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        methods.sort_unstable();
        methods
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

async fn not_found(_req: Request) -> Response {
    Response::status(StatusCode::NOT_FOUND)
}

fn method_not_allowed(allow: String) -> BoxedHandler {
    let endpoint = move |_req: Request| {
        let allow = allow.clone();
        async move {
            Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header("allow", &allow)
                .no_body()
        }
    };
    endpoint.into_boxed_handler()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn request(method: Method, uri: &str) -> Request {
        Request::from(
            http::Request::builder()
                .method(method)
                .uri(uri)
                .body(Bytes::new())
                .unwrap(),
        )
    }

    async fn echo_id(req: Request) -> Response {
        Response::text(req.param("id").unwrap_or("none").to_owned())
    }

    #[tokio::test]
    async fn routes_by_method_and_path() {
        let router = Router::new().on(Method::GET, "/users/{id}", echo_id);
        let res = router.handle(request(Method::GET, "/users/42")).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"42");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let router = Router::new().on(Method::GET, "/users/{id}", echo_id);
        let res = router.handle(request(Method::GET, "/nothing")).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow_in_context() {
        let router = Router::new()
            .on(Method::GET, "/users/{id}", echo_id)
            .on(Method::DELETE, "/users/{id}", echo_id)
            .layer(|req: Request, next: Next| async move {
                let seen = req.context().get(ROUTER_ALLOW).cloned();
                let mut res = next.run(req).await;
                if let Some(AllowedMethods(allow)) = seen {
                    res.append_header("x-seen-allow", allow);
                }
                res
            });

        let res = router.handle(request(Method::PUT, "/users/1")).await;
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.header("allow"), Some("DELETE, GET"));
        assert_eq!(res.header("x-seen-allow"), Some("DELETE, GET"));
    }

    #[tokio::test]
    async fn middleware_runs_in_registration_order() {
        let router = Router::new()
            .on(Method::GET, "/", |_req: Request| async { "body" })
            .layer(|req: Request, next: Next| async move {
                let mut res = next.run(req).await;
                res.append_header("x-order", "outer");
                res
            })
            .layer(|req: Request, next: Next| async move {
                let mut res = next.run(req).await;
                res.append_header("x-order", "inner");
                res
            });

        let res = router.handle(request(Method::GET, "/")).await;
        assert_eq!(res.header_values("x-order"), vec!["inner", "outer"]);
    }
}
