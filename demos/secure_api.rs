//! A small API behind CORS, CSRF, secure headers and JWT authentication.
//!
//! Run with:
//!   cargo run --example secure_api
//!
//! Try:
//!   curl -i http://localhost:3000/form
//!   curl -i -X OPTIONS http://localhost:3000/api/me \
//!        -H 'origin: https://app.example.com' \
//!        -H 'access-control-request-method: GET'
//!   curl -i http://localhost:3000/api/me -H 'authorization: Bearer <jwt signed with "demo-secret">'

use bulwark::middleware::cors::{Cors, CorsConfig};
use bulwark::middleware::csrf::{Csrf, CsrfConfig, csrf_form_html};
use bulwark::middleware::jwt::{JWT_USER, Jwt, JwtConfig};
use bulwark::middleware::secure::Secure;
use bulwark::{Request, Response, Router, Server};
use http::Method;
use jsonwebtoken::DecodingKey;

#[tokio::main]
async fn main() -> Result<(), bulwark::Error> {
    tracing_subscriber::fmt::init();

    let jwt: Jwt = Jwt::new(JwtConfig::default(), DecodingKey::from_secret(b"demo-secret"))?;
    let jwt = jwt.skipper(|req: &Request| !req.path().starts_with("/api/"));

    let app = Router::new()
        .on(Method::GET,  "/form",   form)
        .on(Method::POST, "/form",   submit)
        .on(Method::GET,  "/api/me", me)
        .layer(Secure::default())
        .layer(Cors::new(CorsConfig {
            allow_origins: vec!["https://*.example.com".into()],
            allow_credentials: true,
            max_age: 600,
            ..CorsConfig::default()
        })?)
        .layer(Csrf::new(CsrfConfig::default())?.skipper(|req: &Request| req.path().starts_with("/api/")))
        .layer(jwt);

    Server::bind("0.0.0.0:3000").body_limit(1024 * 1024).serve(app).await
}

// GET /form: the CSRF middleware has already put a token in the context.
async fn form(req: Request) -> Response {
    let html = format!(
        r#"<form method="post" action="/form">{}<button>send</button></form>"#,
        csrf_form_html(&req),
    );
    Response::builder().html(html)
}

// POST /form: only reached with a matching token.
async fn submit(_req: Request) -> &'static str {
    "accepted"
}

// GET /api/me
async fn me(req: Request) -> Response {
    match req.context().get(JWT_USER) {
        Some(token) => Response::json(serde_json::to_vec(&token.claims).unwrap_or_default()),
        None => Response::status(http::StatusCode::UNAUTHORIZED),
    }
}
