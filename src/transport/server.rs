//! warp routes over a shared [`Relay`].
//!
//! The relay is synchronous (file I/O, git subprocesses), so every handler
//! hops onto tokio's blocking pool with `spawn_blocking`. Rejections from
//! warp itself (unknown path, wrong method, oversized body) are answered with
//! the same JSON error body as handler failures.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};
use warp::Filter;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::{Json, WithStatus};

use super::{CommitResponse, ErrorResponse, OkResponse, PushRequest};
use crate::error::TandemError;
use crate::relay::Relay;

/// Largest accepted push body.
pub const MAX_PUSH_BYTES: u64 = 64 * 1024 * 1024;

/// All API routes.
pub fn routes(
    relay: Arc<Relay>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let push = warp::path!("api" / "push")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_PUSH_BYTES))
        .and(warp::body::bytes())
        .and(with_relay(Arc::clone(&relay)))
        .and_then(handle_push);

    let commit = warp::path!("api" / "commit")
        .and(warp::post())
        .and(with_relay(Arc::clone(&relay)))
        .and_then(handle_commit);

    let status = warp::path!("api" / "status")
        .and(warp::get())
        .and(with_relay(relay))
        .and_then(handle_status);

    push.or(commit)
        .or(status)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Serve the API on `addr` until `shutdown` resolves.
///
/// # Errors
/// Fails if the address cannot be bound.
pub async fn serve(
    relay: Arc<Relay>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), TandemError> {
    let (bound, server) = warp::serve(routes(relay))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| TandemError::Io(std::io::Error::other(format!("cannot bind {addr}: {e}"))))?;
    info!(addr = %bound, "listening");
    server.await;
    info!("server stopped");
    Ok(())
}

fn with_relay(
    relay: Arc<Relay>,
) -> impl Filter<Extract = (Arc<Relay>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&relay))
}

fn reply<T: Serialize>(status: StatusCode, body: &T) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(err: &TandemError) -> WithStatus<Json> {
    if err.is_rejection() {
        return reply(StatusCode::BAD_REQUEST, &ErrorResponse::new(err.to_string()));
    }
    error!(error = %err, "request failed");
    let body = match err {
        TandemError::Commit(e) => ErrorResponse::new(err.to_string()).with_stage(e.stage()),
        _ => ErrorResponse::new(err.to_string()),
    };
    reply(StatusCode::INTERNAL_SERVER_ERROR, &body)
}

async fn handle_rejection(err: warp::Rejection) -> Result<WithStatus<Json>, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "no such endpoint".to_owned())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("push body is larger than {MAX_PUSH_BYTES} bytes"),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            "push body needs a content-length header".to_owned(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed for this endpoint".to_owned(),
        )
    } else {
        error!(rejection = ?err, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unhandled rejection: {err:?}"),
        )
    };
    Ok(reply(status, &ErrorResponse::new(message)))
}

/// Run `f` on the blocking pool. A panicked task becomes a 500.
async fn blocking<T, F>(relay: Arc<Relay>, f: F) -> Result<T, WithStatus<Json>>
where
    T: Send + 'static,
    F: FnOnce(&Relay) -> Result<T, TandemError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&relay)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(error_reply(&err)),
        Err(join) => {
            error!(error = %join, "handler task failed");
            Err(reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorResponse::new(format!("internal error: {join}")),
            ))
        }
    }
}

async fn handle_push(body: Bytes, relay: Arc<Relay>) -> Result<WithStatus<Json>, Infallible> {
    let request: PushRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return Ok(reply(
                StatusCode::BAD_REQUEST,
                &ErrorResponse::new(format!("malformed push body: {e}")),
            ));
        }
    };
    Ok(
        match blocking(relay, move |relay| relay.push(request.entry)).await {
            Ok(()) => reply(StatusCode::OK, &OkResponse::default()),
            Err(failure) => failure,
        },
    )
}

async fn handle_commit(relay: Arc<Relay>) -> Result<WithStatus<Json>, Infallible> {
    Ok(match blocking(relay, Relay::commit).await {
        Ok(summary) => reply(StatusCode::OK, &CommitResponse::from(&summary)),
        Err(failure) => failure,
    })
}

async fn handle_status(relay: Arc<Relay>) -> Result<WithStatus<Json>, Infallible> {
    Ok(match blocking(relay, Relay::pending).await {
        Ok(stats) => reply(StatusCode::OK, &stats),
        Err(failure) => failure,
    })
}
