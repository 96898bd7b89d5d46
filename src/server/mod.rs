//! HTTP front-end over a disk store
//!
//! Lets other machines use this host's cache as their `http` remote:
//!
//! ```text
//! GET /action/<actionID>        {"outputID":"<hex>","size":1234} or 404
//! GET /output/<outputID>        payload bytes or 404
//! PUT /<actionID>/<outputID>    Content-Length required; 204 on success
//! ```
//!
//! When a secret is configured, every request must carry it in the `secret`
//! header.

use crate::error::{ProxyError, ProxyResult};
use crate::ids;
use crate::remote::ActionValue;
use crate::store::{stat_object, DiskStore};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared across requests
pub struct ServerState {
    store: DiskStore,
    secret: Option<String>,
}

/// Build the router. An empty secret disables the check.
pub fn router(store: DiskStore, secret: Option<String>) -> Router {
    let state = Arc::new(ServerState {
        store,
        secret: secret.filter(|s| !s.is_empty()),
    });
    Router::new().fallback(handle).with_state(state)
}

/// Bind `listen` and serve until `shutdown` fires.
///
/// Returns the bound address (useful with port 0) and the server task.
pub async fn start_server(
    listen: &str,
    store: DiskStore,
    secret: Option<String>,
    shutdown: CancellationToken,
) -> ProxyResult<(SocketAddr, JoinHandle<ProxyResult<()>>)> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| ProxyError::io(format!("binding {}", listen), e))?;
    let addr = listener
        .local_addr()
        .map_err(|e| ProxyError::io("reading bound address", e))?;

    info!("Cache dir: {}", store.dir().display());
    info!("Listening on {}", addr);

    let app = router(store, secret);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ProxyError::io("serving HTTP", e))
    });

    Ok((addr, handle))
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if let Some(secret) = &state.secret {
        let given = headers.get("secret").and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            warn!("unauthorized {} {}", method, uri);
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    debug!("{} {}", method, uri);

    if method == Method::PUT {
        return handle_put(&state, uri.path(), &headers, body).await;
    }
    if method != Method::GET {
        return (StatusCode::BAD_REQUEST, "bad method").into_response();
    }

    let path = uri.path();
    if let Some(action_id) = path.strip_prefix("/action/") {
        handle_get_action(&state, action_id).await
    } else if let Some(output_id) = path.strip_prefix("/output/") {
        handle_get_output(&state, output_id).await
    } else if path == "/" {
        "hi".into_response()
    } else {
        (StatusCode::NOT_FOUND, "not found").into_response()
    }
}

async fn handle_get_action(state: &ServerState, action_id: &str) -> Response {
    if !ids::is_valid_hex(action_id) {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    }

    let entry = match state.store.get(action_id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return (StatusCode::NOT_FOUND, "not found").into_response(),
        Err(e) => return internal(e),
    };

    // The payload may have been removed since the index entry was written
    match stat_object(&entry.path).await {
        Ok(Some(stat)) => Json(ActionValue {
            output_id: entry.output_id,
            size: stat.size,
        })
        .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "not found (post-stat)").into_response(),
        Err(e) => internal(e),
    }
}

async fn handle_get_output(state: &ServerState, output_id: &str) -> Response {
    if !ids::is_valid_hex(output_id) {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    }

    let path = state.store.object_path(output_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
        Err(e) => internal(ProxyError::io(format!("reading {}", path.display()), e)),
    }
}

async fn handle_put(state: &ServerState, path: &str, headers: &HeaderMap, body: Body) -> Response {
    let ids = path
        .strip_prefix('/')
        .and_then(|rest| rest.split_once('/'))
        .filter(|(a, o)| ids::is_valid_hex(a) && ids::is_valid_hex(o));
    let Some((action_id, output_id)) = ids else {
        return (StatusCode::BAD_REQUEST, "bad URI").into_response();
    };

    let Some(size) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    else {
        return (StatusCode::BAD_REQUEST, "missing Content-Length").into_response();
    };

    let limit = usize::try_from(size).unwrap_or(usize::MAX);
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut reader = Cursor::new(bytes);
    match state.store.put(action_id, output_id, size, &mut reader).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal(e),
    }
}

fn internal(err: ProxyError) -> Response {
    warn!("{}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}
