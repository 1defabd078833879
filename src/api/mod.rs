//! Read/export API over the observation store
//!
//! | Path        | Body                                   |
//! |-------------|----------------------------------------|
//! | `/logs`     | `{"columns": [...], "rows": [[...]]}`  |
//! | `/logs.csv` | CSV attachment, export cap applied     |
//! | `/health`   | `{"status": "ok", "rows": n}`          |
//! | `/metrics`  | API request counters and latencies     |

mod params;
mod render;

use std::sync::Arc;
use std::time::Instant;

use hyper::header::{HeaderValue, CONTENT_DISPOSITION};
use hyper::{Method, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::domain::ObservationStore;
use crate::error::{Error, Result};
use crate::http::{self, respond, HttpResponse};
use crate::metrics::ApiMetrics;

pub use params::{parse_export_query, parse_log_query};
pub use render::{to_csv, LogsBody, COLUMNS};

const JSON: &str = "application/json";
const CSV: &str = "text/csv";

/// Shared state behind every API request
pub struct ApiState<S> {
    store: Arc<S>,
    metrics: ApiMetrics,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: ObservationStore + 'static> ApiState<S> {
    pub fn new(store: Arc<S>, metrics: ApiMetrics) -> Self {
        Self { store, metrics }
    }

    pub fn metrics(&self) -> &ApiMetrics {
        &self.metrics
    }

    /// Route one request and record it against its endpoint
    pub async fn handle(&self, method: &Method, path: &str, query: Option<&str>) -> HttpResponse {
        let started = Instant::now();
        let endpoint = endpoint_label(path);

        let response = if *method != Method::GET {
            error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        } else {
            match self.dispatch(path, query).await {
                Ok(response) => response,
                Err(e @ Error::InvalidQuery { .. }) => {
                    error_response(StatusCode::BAD_REQUEST, &e.to_string())
                }
                Err(e) => {
                    error!("API request {} failed: {}", path, e);
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
                }
            }
        };

        self.metrics
            .observe(endpoint, method.as_str(), started.elapsed().as_secs_f64());
        debug!(
            endpoint,
            method = %method,
            status = response.status().as_u16(),
            "API request served"
        );
        response
    }

    async fn dispatch(&self, path: &str, query: Option<&str>) -> Result<HttpResponse> {
        match path {
            "/logs" => {
                let query = parse_log_query(query)?;
                let rows = self.store.query(&query).await?;
                let body = serde_json::to_vec(&LogsBody::new(&rows))?;
                Ok(respond(StatusCode::OK, JSON, body))
            }
            "/logs.csv" => {
                let query = parse_export_query(query)?;
                let rows = self.store.query(&query).await?;
                let mut response = respond(StatusCode::OK, CSV, to_csv(&rows)?);
                response.headers_mut().insert(
                    CONTENT_DISPOSITION,
                    HeaderValue::from_static("attachment; filename=weather.csv"),
                );
                Ok(response)
            }
            "/health" => {
                let rows = self.store.count().await?;
                let body = serde_json::to_vec(&json!({ "status": "ok", "rows": rows }))?;
                Ok(respond(StatusCode::OK, JSON, body))
            }
            "/metrics" => Ok(respond(
                StatusCode::OK,
                prometheus::TEXT_FORMAT,
                self.metrics.encode()?,
            )),
            _ => Ok(http::not_found()),
        }
    }
}

/// Known paths keep their own label; everything else shares one
fn endpoint_label(path: &str) -> &'static str {
    match path {
        "/logs" => "/logs",
        "/logs.csv" => "/logs.csv",
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "other",
    }
}

fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    let body = json!({ "error": message }).to_string();
    respond(status, JSON, body)
}

/// Serve the API on `addr` until `shutdown` fires
pub async fn serve_api<S: ObservationStore + 'static>(
    addr: &str,
    state: ApiState<S>,
    shutdown: CancellationToken,
) -> Result<()> {
    http::serve("Query API", addr, shutdown, move |req| {
        let state = state.clone();
        async move {
            let query = req.uri().query().map(str::to_owned);
            state
                .handle(req.method(), req.uri().path(), query.as_deref())
                .await
        }
    })
    .await
}
