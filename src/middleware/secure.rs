//! Browser hardening headers: XSS filter, MIME sniffing, framing, HSTS,
//! content security and referrer policy.
//!
//! Headers a handler already set are left alone.

use std::sync::Arc;

use http::header::{
    CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY_REPORT_ONLY, HeaderName, REFERRER_POLICY,
    STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use serde::Deserialize;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, NeverSkip, Next, Skipper};
use crate::request::Request;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SecureConfig {
    pub x_xss_protection: String,
    pub content_type_nosniff: String,
    pub x_frame_options: String,
    /// Seconds. `0` disables HSTS.
    pub hsts_max_age: u64,
    pub hsts_exclude_subdomains: bool,
    pub hsts_preload: bool,
    pub content_security_policy: String,
    pub csp_report_only: bool,
    pub referrer_policy: String,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            x_xss_protection: "1; mode=block".to_owned(),
            content_type_nosniff: "nosniff".to_owned(),
            x_frame_options: "SAMEORIGIN".to_owned(),
            hsts_max_age: 0,
            hsts_exclude_subdomains: false,
            hsts_preload: false,
            content_security_policy: String::new(),
            csp_report_only: false,
            referrer_policy: String::new(),
        }
    }
}

pub struct Secure {
    /// Sent on every response.
    always: Vec<(HeaderName, String)>,
    /// Sent only to requests that reached the proxy over https.
    hsts: Option<String>,
    skipper: Arc<dyn Skipper>,
}

impl Secure {
    pub fn new(config: SecureConfig) -> Self {
        let csp_header = if config.csp_report_only {
            CONTENT_SECURITY_POLICY_REPORT_ONLY
        } else {
            CONTENT_SECURITY_POLICY
        };
        let always = [
            (X_XSS_PROTECTION, config.x_xss_protection),
            (X_CONTENT_TYPE_OPTIONS, config.content_type_nosniff),
            (X_FRAME_OPTIONS, config.x_frame_options),
            (csp_header, config.content_security_policy),
            (REFERRER_POLICY, config.referrer_policy),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();

        let hsts = (config.hsts_max_age != 0).then(|| {
            let mut value = format!("max-age={}", config.hsts_max_age);
            if !config.hsts_exclude_subdomains {
                value.push_str("; includeSubdomains");
            }
            if config.hsts_preload {
                value.push_str("; preload");
            }
            value
        });

        Self { always, hsts, skipper: Arc::new(NeverSkip) }
    }

    pub fn skipper(mut self, skipper: impl Skipper) -> Self {
        self.skipper = Arc::new(skipper);
        self
    }
}

impl Default for Secure {
    fn default() -> Self { Self::new(SecureConfig::default()) }
}

impl Middleware for Secure {
    fn call(&self, req: Request, next: Next) -> BoxFuture {
        if self.skipper.skip(&req) {
            return next.run(req);
        }

        let mut headers = self.always.clone();
        if let Some(hsts) = &self.hsts {
            if req.header("x-forwarded-proto") == Some("https") {
                headers.push((STRICT_TRANSPORT_SECURITY, hsts.clone()));
            }
        }

        let fut = next.run(req);
        Box::pin(async move {
            let mut res = fut.await;
            for (name, value) in headers {
                if res.header(name.as_str()).is_none() {
                    res.append_header(name.as_str(), value);
                }
            }
            res
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;

    use super::*;
    use crate::response::Response;
    use crate::router::Router;

    fn request(proto: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/");
        if let Some(proto) = proto {
            builder = builder.header("x-forwarded-proto", proto);
        }
        Request::from(builder.body(Bytes::new()).unwrap())
    }

    fn router(secure: Secure) -> Router {
        Router::new()
            .on(Method::GET, "/", |_req: Request| async {
                let mut res = Response::text("ok");
                res.set_header("x-frame-options", "DENY");
                res
            })
            .layer(secure)
    }

    #[tokio::test]
    async fn defaults() {
        let res = router(Secure::default()).handle(request(Some("https"))).await;
        assert_eq!(res.header("x-xss-protection"), Some("1; mode=block"));
        assert_eq!(res.header("x-content-type-options"), Some("nosniff"));
        assert_eq!(res.header_values("x-frame-options"), vec!["DENY"]);
        assert_eq!(res.header("strict-transport-security"), None);
        assert_eq!(res.header("content-security-policy"), None);
    }

    #[tokio::test]
    async fn hsts_only_over_https() {
        let secure = || Secure::new(SecureConfig {
            hsts_max_age: 3600,
            hsts_preload: true,
            ..SecureConfig::default()
        });

        let res = router(secure()).handle(request(Some("https"))).await;
        assert_eq!(res.header("strict-transport-security"), Some("max-age=3600; includeSubdomains; preload"));

        let res = router(secure()).handle(request(Some("http"))).await;
        assert_eq!(res.header("strict-transport-security"), None);
    }

    #[tokio::test]
    async fn csp_report_only_and_suppressed_headers() {
        let secure = Secure::new(SecureConfig {
            x_xss_protection: String::new(),
            content_security_policy: "default-src 'self'".to_owned(),
            csp_report_only: true,
            referrer_policy: "no-referrer".to_owned(),
            ..SecureConfig::default()
        });
        let res = router(secure).handle(request(None)).await;
        assert_eq!(res.header("x-xss-protection"), None);
        assert_eq!(res.header("content-security-policy-report-only"), Some("default-src 'self'"));
        assert_eq!(res.header("content-security-policy"), None);
        assert_eq!(res.header("referrer-policy"), Some("no-referrer"));
    }
}
