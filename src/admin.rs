use crate::scanner::ScanController;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::AUTHORIZATION;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Version information for the daemon
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Admin API server: scan triggers, reports, and operator controls
pub struct AdminServer {
    bind_addr: SocketAddr,
    controller: Arc<ScanController>,
    scan_tx: mpsc::Sender<()>,
    shutdown_rx: watch::Receiver<bool>,
    auth_token: Arc<String>,
}

impl AdminServer {
    pub fn new(
        bind_addr: SocketAddr,
        controller: Arc<ScanController>,
        scan_tx: mpsc::Sender<()>,
        shutdown_rx: watch::Receiver<bool>,
        auth_token: String,
    ) -> Self {
        Self {
            bind_addr,
            controller,
            scan_tx,
            shutdown_rx,
            auth_token: Arc::new(auth_token),
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Admin API server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let controller = Arc::clone(&self.controller);
                            let scan_tx = self.scan_tx.clone();
                            let auth_token = Arc::clone(&self.auth_token);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let controller = Arc::clone(&controller);
                                    let scan_tx = scan_tx.clone();
                                    let token = Arc::clone(&auth_token);
                                    async move { handle_admin_request(req, controller, scan_tx, token).await }
                                });

                                if let Err(e) = AutoBuilder::new(TokioExecutor::new())
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(addr = %addr, error = %e, "Admin connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept admin connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Admin server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

fn check_auth(req: &Request<hyper::body::Incoming>, expected_token: &str) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|auth| {
            // Support "Bearer <token>" format
            auth.strip_prefix("Bearer ")
                .unwrap_or(auth)
                .eq(expected_token)
        })
        .unwrap_or(false)
}

async fn handle_admin_request(
    req: Request<hyper::body::Incoming>,
    controller: Arc<ScanController>,
    scan_tx: mpsc::Sender<()>,
    auth_token: Arc<String>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    let method = req.method();

    debug!(%method, %path, "Admin API request");

    // Health check and version need no auth
    let needs_auth = !matches!((method, path), (&Method::GET, "/health" | "/version"));
    if needs_auth && !check_auth(&req, &auth_token) {
        warn!(path, "Unauthorized admin API request");
        return Ok(response(StatusCode::UNAUTHORIZED, "unauthorized"));
    }

    let response = match (method, req.uri().path()) {
        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        // Queue a scan cycle; a cycle already pending means nothing to do
        (&Method::POST, "/scan") => match scan_tx.try_send(()) {
            Ok(()) => json_response(
                StatusCode::ACCEPTED,
                serde_json::json!({"queued": true}).to_string(),
            ),
            Err(mpsc::error::TrySendError::Full(())) => json_response(
                StatusCode::ACCEPTED,
                serde_json::json!({"queued": false, "note": "scan already pending"}).to_string(),
            ),
            Err(mpsc::error::TrySendError::Closed(())) => {
                response(StatusCode::SERVICE_UNAVAILABLE, "scanner stopped")
            }
        },

        // Run the cycle without committing and return the assembled text
        (&Method::POST, "/scan/dry-run") => match controller.scan(true).await {
            Ok(report) => match serde_json::to_string(&report) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("report serialization failed: {}", e),
                ),
            },
            Err(e) => response(StatusCode::INTERNAL_SERVER_ERROR, format!("scan failed: {}", e)),
        },

        (&Method::GET, "/report") => match controller.last_report() {
            Some(report) => match serde_json::to_string(&report) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("report serialization failed: {}", e),
                ),
            },
            None => response(StatusCode::NOT_FOUND, "no scan has completed yet"),
        },

        (&Method::GET, "/campaigns") => {
            let blocks = controller.block_summaries().await;
            let body = serde_json::json!({
                "campaigns": blocks,
                "count": blocks.len(),
            });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::GET, "/status") => {
            let body = serde_json::json!({
                "phase": controller.orchestrator().phase(),
                "fatal": controller.orchestrator().is_fatal(),
                "current_version": controller.current_version().await,
                "block_count": controller.block_summaries().await.len(),
            });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::POST, "/fatal/clear") => {
            if controller.orchestrator().clear_fatal() {
                json_response(
                    StatusCode::OK,
                    serde_json::json!({"cleared": true}).to_string(),
                )
            } else {
                json_response(
                    StatusCode::OK,
                    serde_json::json!({"cleared": false, "note": "not in fatal state"}).to_string(),
                )
            }
        }

        // 404 for everything else
        _ => response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}
