//! HTTP front end.
//!
//! `GET /health` answers liveness probes; `POST /process-video` takes
//! `{"url": ...}` and answers with the rendered short as `video/mp4`, its
//! title and description JSON-encoded in `X-Video-Title` and
//! `X-Video-Description`. Errors are `{"error": ...}` bodies.

mod headers;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};
use warp::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use warp::http::{Response, StatusCode};
use warp::hyper::body::Bytes;
use warp::hyper::Body;
use warp::{Filter, Rejection, Reply};

use crate::error::ConfigError;
use crate::pipeline::{Pipeline, PipelineError, ShortMetadata};

pub use headers::ascii_json_string;

pub const HEALTH_PATH: &str = "health";
pub const PROCESS_PATH: &str = "process-video";
pub const TITLE_HEADER: &str = "X-Video-Title";
pub const DESCRIPTION_HEADER: &str = "X-Video-Description";
pub const JOB_ID_HEADER: &str = "X-Job-Id";
pub const DOWNLOAD_NAME: &str = "short.mp4";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: warp::Error,
    },
}

/// Shared by every request: the pipeline, the job permits and the deadline.
#[derive(Clone)]
pub struct ServerState {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
    max_body_bytes: u64,
}

impl ServerState {
    pub fn new(pipeline: Pipeline) -> Self {
        let server = &pipeline.config().server;
        let permits = Arc::new(Semaphore::new(server.max_concurrent_jobs.max(1)));
        let request_timeout = server.request_timeout();
        let max_body_bytes = server.max_body_bytes;
        Self {
            pipeline: Arc::new(pipeline),
            permits,
            request_timeout,
            max_body_bytes,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

pub fn routes(
    state: ServerState,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path(HEALTH_PATH)
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    let process = warp::path(PROCESS_PATH)
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(state.max_body_bytes))
        .and(warp::body::bytes())
        .and(with_state(state))
        .and_then(process_video);

    health
        .or(process)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

fn with_state(state: ServerState) -> impl Filter<Extract = (ServerState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn process_video(body: Bytes, state: ServerState) -> Result<warp::reply::Response, Infallible> {
    let url = match extract_url(&body) {
        Ok(url) => url,
        Err(message) => return Ok(error_reply(StatusCode::BAD_REQUEST, message)),
    };
    if let Err(err) = state.pipeline.check_request(&url) {
        return Ok(error_reply(status_for(&err), &err.to_string()));
    }

    let job = async {
        // The semaphore is never closed, so acquiring only waits.
        let _permit = state.permits.acquire().await.ok();
        let artifact = state.pipeline.process(&url).await?;
        let bytes = artifact.read().await?;
        Ok::<_, PipelineError>((artifact.metadata.clone(), bytes))
    };

    match timeout(state.request_timeout, job).await {
        Ok(Ok((metadata, bytes))) => {
            info!(job = %metadata.job_id, size_bytes = bytes.len(), title = %metadata.title, "short delivered");
            Ok(video_reply(&metadata, bytes))
        }
        Ok(Err(err)) => {
            error!(%url, error = %err, "processing failed");
            Ok(error_reply(status_for(&err), &err.to_string()))
        }
        Err(_) => {
            warn!(%url, limit = ?state.request_timeout, "request timed out, job cancelled");
            Ok(error_reply(
                StatusCode::GATEWAY_TIMEOUT,
                &format!(
                    "request exceeded {}s processing limit",
                    state.request_timeout.as_secs()
                ),
            ))
        }
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn extract_url(body: &[u8]) -> Result<String, &'static str> {
    let value: Value = serde_json::from_slice(body).map_err(|_| "Invalid JSON body")?;
    let Value::Object(object) = value else {
        return Err("Invalid JSON body");
    };
    object
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or("No URL provided")
}

fn video_reply(metadata: &ShortMetadata, bytes: Vec<u8>) -> warp::reply::Response {
    let built = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "video/mp4")
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{DOWNLOAD_NAME}\""),
        )
        .header(TITLE_HEADER, ascii_json_string(&metadata.title))
        .header(DESCRIPTION_HEADER, ascii_json_string(&metadata.description))
        .header(JOB_ID_HEADER, metadata.job_id.to_string())
        .body(Body::from(bytes));
    match built {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "failed to build video response");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "failed to build response")
        }
    }
}

fn error_reply(status: StatusCode, message: &str) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&ErrorBody { error: message }), status)
        .into_response()
}

async fn handle_rejection(rejection: Rejection) -> Result<warp::reply::Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        warn!(?rejection, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };
    Ok(error_reply(status, message))
}

/// Binds the listener without serving yet, so bind errors surface before
/// the caller commits to running. Returns the bound address (useful with
/// port 0) and the server future, which resolves after `shutdown` fires
/// and in-flight requests finish.
pub fn bind<F>(
    pipeline: Pipeline,
    shutdown: F,
) -> Result<(SocketAddr, impl Future<Output = ()> + 'static), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = pipeline.config().server.socket_addr()?;
    let state = ServerState::new(pipeline);
    warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|source| ServerError::Bind { addr, source })
}

pub async fn serve<F>(pipeline: Pipeline, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let request_timeout = pipeline.config().server.request_timeout();
    let jobs = pipeline.config().server.max_concurrent_jobs;
    let (addr, server) = bind(pipeline, shutdown)?;
    info!(%addr, ?request_timeout, max_concurrent_jobs = jobs, "reelcut listening");
    server.await;
    info!("server stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
