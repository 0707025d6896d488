//! Accept loop, per-connection service and shutdown.
//!
//! On SIGTERM or Ctrl-C the listener stops accepting, connections already
//! being served finish their requests, and [`Server::serve`] returns.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::error::Error;
use crate::middleware::BoxError;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

/// Largest request body read by default: 4 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    body_limit: usize,
}

impl Server {
    /// Remembers `addr`; the socket is only opened by [`serve`](Server::serve).
    ///
    /// # Panics
    ///
    /// If `addr` does not parse as `host:port`. Addresses come from startup
    /// configuration, where failing loudly is what you want.
    ///
    /// ```rust,no_run
    /// use bulwark::Server;
    /// let server = Server::bind("127.0.0.1:8080");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("listen address must be host:port");
        Self { addr, body_limit: DEFAULT_BODY_LIMIT }
    }

    /// Caps request bodies at `bytes`. Larger ones are answered with
    /// `413 Payload Too Large` before any middleware runs.
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Request bodies are buffered in full, up to the
    /// [`body_limit`](Server::body_limit), before the middleware chain runs.
    ///
    /// Resolves once a shutdown signal arrived and every open connection
    /// has been drained.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let router = Arc::new(router);
        info!(addr = %self.addr, body_limit = self.body_limit, "bulwark listening");

        let mut connections = tokio::task::JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown wins over queued connections.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = connections.len(), "shutdown signal received, draining connections");
                    break;
                }

                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("failed to accept connection: {e}");
                            continue;
                        }
                    };
                    connections.spawn(serve_connection(Arc::clone(&router), stream, peer, self.body_limit));
                }

                // Reap finished connections so the set stays small.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}

        info!("bulwark stopped");
        Ok(())
    }
}

/// Serves every request of one connection, HTTP/1.1 or HTTP/2 as negotiated.
async fn serve_connection(router: Arc<Router>, stream: TcpStream, peer: SocketAddr, body_limit: usize) {
    let service = service_fn(move |req| dispatch(Arc::clone(&router), req, body_limit));
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        error!(%peer, "connection error: {e}");
    }
}

/// Buffers one request, runs it through the router, and converts the result
/// for hyper.
///
/// Never fails towards hyper: an oversized body is answered with `413`, an
/// unreadable one with `400`, everything else is up to the router and its
/// middleware.
async fn dispatch(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
    body_limit: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match read_body(body, body_limit).await {
        Ok(body) => body,
        Err(status) => {
            debug!(method = %parts.method, path = parts.uri.path(), status = status.as_u16(), "request body refused");
            return Ok(Response::status(status).into_http());
        }
    };

    let response = router.handle(Request::from_parts(parts, body, HashMap::new())).await;
    Ok(response.into_http())
}

/// Collects at most `limit` bytes. A declared length over the limit is
/// refused before anything is read.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, StatusCode>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    if body.size_hint().lower() > limit as u64 {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(StatusCode::PAYLOAD_TOO_LARGE),
        Err(e) => {
            debug!("unreadable request body: {e}");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

/// SIGTERM or SIGINT, whichever comes first. Only Ctrl-C off Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
