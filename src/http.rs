//! Minimal HTTP/1 serving for the metrics and API endpoints

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::metrics::encode_registry;

pub type HttpResponse = Response<Full<Bytes>>;

/// Build a response with a static content type
pub fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub fn not_found() -> HttpResponse {
    respond(StatusCode::NOT_FOUND, "text/plain", "not found")
}

/// Accept connections on `addr` until `shutdown` fires, serving each with `handler`
pub async fn serve<H, Fut>(
    name: &'static str,
    addr: &str,
    shutdown: CancellationToken,
    handler: H,
) -> Result<()>
where
    H: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} address '{}': {}", name, addr, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", name, e)))?;

    info!("{} listening on {}", name, addr);

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("{} shutting down", name);
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("{} accept error: {}", name, e)))?,
        };

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler(req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} connection error: {}", name, e);
            }
        });
    }
}

/// Serve `/metrics` from `registry` plus `/healthz` and `/livez`
pub async fn serve_metrics(
    addr: &str,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<()> {
    serve("Metrics server", addr, shutdown, move |req| {
        let registry = registry.clone();
        async move { metrics_response(req.uri().path(), &registry) }
    })
    .await
}

fn metrics_response(path: &str, registry: &Registry) -> HttpResponse {
    match path {
        "/metrics" => match encode_registry(registry) {
            Ok(buffer) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, buffer),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "metrics unavailable",
                )
            }
        },
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        _ => not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PipelineMetrics;

    #[test]
    fn test_metrics_path_serves_text_format() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_inserted(1);

        let response = metrics_response("/metrics", metrics.registry());

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            prometheus::TEXT_FORMAT
        );
    }

    #[test]
    fn test_health_and_unknown_paths() {
        let registry = Registry::new();

        assert_eq!(metrics_response("/healthz", &registry).status(), StatusCode::OK);
        assert_eq!(
            metrics_response("/nope", &registry).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_serve_rejects_bad_address() {
        let result = serve("Test server", "not-an-address", CancellationToken::new(), |_| async {
            not_found()
        })
        .await;

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = serve("Test server", "127.0.0.1:0", shutdown, |_| async { not_found() }).await;

        assert!(result.is_ok());
    }
}
