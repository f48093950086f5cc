//! HTTP API for the engagement ledger
//!
//! ## Engagement API
//! - `PUT /engagement/{kind}/on` - Turn an action on (`{userId, targetId}`)
//! - `PUT /engagement/{kind}/off` - Turn an action off
//! - `GET /engagement/state?userId=&targetId=` - Viewer's on/off state per kind
//! - `GET /engagement/counters/{targetId}` - Projected counters
//! - `GET /engagement/history/{targetId}` - Ledger rows, including off rows
//! - `POST /engagement/reconcile/{targetId}` - Recompute counters from the ledger
//!
//! `{kind}` is `like`, `founding-recommend` or `registration-recommend`.
//!
//! ## Statistics API
//! - `GET /statistics?collegeId=&departmentId=&semesterId=&fieldId=&categoryId=&groupBy=`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X PUT -H "Content-Type: application/json" \
//!      -d '{"userId": 1, "targetId": 100}' \
//!      http://localhost:8092/engagement/like/on
//!
//! curl "http://localhost:8092/statistics?collegeId=2&groupBy=DEPARTMENT"
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::db::ActionKind;
use crate::error::LedgerError;
use crate::services::{self, Services};
use crate::views::{
    CountersView, EngagementActionView, ReconcileReportView, StatisticsQueryView,
    StatisticsRowView, ToggleRequestView, ToggleResponseView, ViewerStateView,
};

type HttpResponse = Response<Full<Bytes>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewerStateQuery {
    user_id: i64,
    target_id: i64,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), LedgerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), LedgerError> {
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    async fn handle_request(&self, req: Request<Incoming>) -> Result<HttpResponse, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        let query = req.uri().query().unwrap_or("").to_string();

        debug!(method = %method, path = %path, "Incoming request");

        match self.route(req, &method, &path, &query).await {
            Ok(response) => Ok(response),
            Err(e) => {
                match &e {
                    LedgerError::NotFound(_)
                    | LedgerError::InvalidScope(_)
                    | LedgerError::InvalidInput(_)
                    | LedgerError::Parse(_)
                    | LedgerError::Json(_) => debug!(error = %e, "Request rejected"),
                    _ => error!(error = %e, "Request error"),
                }
                Ok(services::error_response(e))
            }
        }
    }

    async fn route(
        &self,
        req: Request<Incoming>,
        method: &Method,
        path: &str,
        query: &str,
    ) -> Result<HttpResponse, LedgerError> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.handle_health().await,

            (&Method::PUT, ["engagement", kind, switch @ ("on" | "off")]) => {
                let kind: ActionKind = kind.parse()?;
                self.handle_toggle(req, kind, *switch == "on").await
            }
            (&Method::GET, ["engagement", "state"]) => self.handle_viewer_state(query).await,
            (&Method::GET, ["engagement", "counters", id]) => {
                self.handle_counters(parse_id(id)?).await
            }
            (&Method::GET, ["engagement", "history", id]) => {
                self.handle_history(parse_id(id)?).await
            }
            (&Method::POST, ["engagement", "reconcile", id]) => {
                self.handle_reconcile(parse_id(id)?).await
            }

            (&Method::GET, ["statistics"]) => self.handle_statistics(query).await,

            (_, ["health"]) | (_, ["statistics"]) => Ok(services::method_not_allowed()),

            _ => Ok(services::not_found("Not found")),
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Result<HttpResponse, LedgerError> {
        let db = self.services.db.clone();
        let stats = blocking(move || db.stats()).await?;
        Ok(services::ok(&serde_json::json!({
            "status": "ok",
            "stats": stats,
        })))
    }

    /// PUT /engagement/{kind}/on|off
    async fn handle_toggle(
        &self,
        req: Request<Incoming>,
        kind: ActionKind,
        desired_on: bool,
    ) -> Result<HttpResponse, LedgerError> {
        let body: ToggleRequestView = read_json(req).await?;
        let engagement = self.services.engagement.clone();

        // Retries back off with a blocking sleep
        let transition = blocking(move || {
            if desired_on {
                engagement.toggle_on(body.user_id, body.target_id, kind)
            } else {
                engagement.toggle_off(body.user_id, body.target_id, kind)
            }
        })
        .await?;

        Ok(services::ok(&ToggleResponseView::from(transition)))
    }

    /// GET /engagement/state?userId=&targetId=
    async fn handle_viewer_state(&self, query: &str) -> Result<HttpResponse, LedgerError> {
        let query: ViewerStateQuery = parse_query(query)?;
        let engagement = self.services.engagement.clone();
        let state =
            blocking(move || engagement.viewer_state(query.user_id, query.target_id)).await?;
        Ok(services::ok(&ViewerStateView::from(state)))
    }

    /// GET /engagement/counters/{targetId}
    async fn handle_counters(&self, target_id: i64) -> Result<HttpResponse, LedgerError> {
        let engagement = self.services.engagement.clone();
        let counters = blocking(move || engagement.counters(target_id)).await?;
        Ok(services::ok(&CountersView::from(counters)))
    }

    /// GET /engagement/history/{targetId}
    async fn handle_history(&self, target_id: i64) -> Result<HttpResponse, LedgerError> {
        let engagement = self.services.engagement.clone();
        let rows = blocking(move || engagement.history(target_id)).await?;
        let views: Vec<EngagementActionView> = rows.into_iter().map(Into::into).collect();
        Ok(services::ok(&views))
    }

    /// POST /engagement/reconcile/{targetId}
    async fn handle_reconcile(&self, target_id: i64) -> Result<HttpResponse, LedgerError> {
        let engagement = self.services.engagement.clone();
        let report = blocking(move || engagement.reconcile(target_id)).await?;
        if report.corrected() {
            info!(target_id, kinds = report.drift.len(), "Reconciled drifted counters");
        }
        Ok(services::ok(&ReconcileReportView::from(report)))
    }

    /// GET /statistics
    async fn handle_statistics(&self, query: &str) -> Result<HttpResponse, LedgerError> {
        let query: StatisticsQueryView = parse_query(query)?;
        let (scope, group_by) = query.into_parts()?;

        let statistics = self.services.statistics.clone();
        let rows = blocking(move || statistics.aggregate(&scope, group_by)).await?;
        let views: Vec<StatisticsRowView> = rows.into_iter().map(Into::into).collect();
        Ok(services::ok(&views))
    }
}

/// Run SQLite work on the blocking pool instead of an async worker
async fn blocking<F, T>(f: F) -> Result<T, LedgerError>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Internal(format!("Blocking task failed: {}", e)))?
}

fn parse_id(raw: &str) -> Result<i64, LedgerError> {
    raw.parse()
        .map_err(|_| LedgerError::Parse(format!("Invalid id: {}", raw)))
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T, LedgerError> {
    serde_urlencoded::from_str(query)
        .map_err(|e| LedgerError::Parse(format!("Invalid query string: {}", e)))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, LedgerError> {
    let body = req
        .collect()
        .await
        .map_err(|e| LedgerError::Internal(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}
