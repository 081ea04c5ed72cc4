//! Per-connection session: `Unauthed` → `Authed` → `Closed`.
//!
//! The first frame must be a valid `auth` within ten seconds; anything
//! else (wrong method, malformed JSON, deadline expiry, bad token) earns
//! -32005 and the connection closes. After authentication each
//! `tool_request` runs in its own task so concurrent requests pipeline;
//! replies to different correlation ids may interleave in any order.
//!
//! Teardown never resolves pending approvals: they stay valid for
//! durable pickup after reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::orchestrator::{Orchestrator, ReplyHandle};
use crate::rpc::{self, code, Request};

/// How long an unauthenticated connection may exist.
const AUTH_DEADLINE: Duration = Duration::from_secs(10);

/// How long teardown waits for the writer to flush buffered frames.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Outgoing-frame buffer per connection.
const OUTGOING_BUFFER: usize = 64;

/// Drive one accepted WebSocket connection to completion.
///
/// Returns when the transport closes or errors; pending approvals are
/// left untouched either way.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    orchestrator: Arc<Orchestrator>,
    agent_token: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTGOING_BUFFER);

    // One writer task owns the sink; every reply path holds a sender
    // clone. When the last sender drops, the writer closes the socket.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if authenticate(&mut stream, &tx, agent_token).await.is_ok() {
        info!("agent authenticated");
        dispatch_loop(&mut stream, &orchestrator, &tx).await;
        debug!("agent connection closed");
    }

    // Suspended requests keep sender clones of this channel, so the
    // writer cannot be drained by waiting for the channel to close: that
    // would pin the connection slot until the last approval resolves.
    // Give buffered frames a moment to flush, then cut the writer; from
    // that point resolution sends fail and results route to the durable
    // store instead.
    drop(tx);
    if tokio::time::timeout(WRITER_DRAIN_GRACE, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
        let _ = writer.await;
    }
}

/// Authentication failed; the connection must close.
struct AuthFailed;

async fn authenticate<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    tx: &mpsc::Sender<String>,
    agent_token: &str,
) -> Result<(), AuthFailed>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let refuse = |id: Value| async move {
        let _ = tx
            .send(rpc::error_frame(&id, code::NOT_AUTHENTICATED, "Not authenticated"))
            .await;
        Err(AuthFailed)
    };

    let first = match tokio::time::timeout(AUTH_DEADLINE, stream.next()).await {
        Err(_elapsed) => {
            debug!("auth deadline expired");
            return refuse(Value::Null).await;
        },
        Ok(None) | Ok(Some(Err(_))) => return Err(AuthFailed),
        Ok(Some(Ok(msg))) => msg,
    };

    let Message::Text(text) = first else {
        return refuse(Value::Null).await;
    };
    // In the unauthed state every defect is an auth failure, not a
    // protocol error: malformed JSON gets -32005, not -32700.
    let Ok(request) = serde_json::from_str::<Request>(&text) else {
        return refuse(Value::Null).await;
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    if !request.has_valid_version() || request.method.as_deref() != Some("auth") {
        return refuse(id).await;
    }

    let presented = request
        .params
        .get("token")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !token_matches(presented, agent_token) {
        // The token itself is never logged or echoed.
        warn!("agent presented an invalid token");
        return refuse(id).await;
    }

    let _ = tx
        .send(rpc::result_frame(&id, json!({"status": "authenticated"})))
        .await;
    Ok(())
}

/// Constant-time bearer-token comparison.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

async fn dispatch_loop<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    orchestrator: &Arc<Orchestrator>,
    tx: &mpsc::Sender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "transport error; closing session");
                return;
            },
        };
        match msg {
            Message::Text(text) => dispatch_frame(&text, orchestrator, tx).await,
            Message::Binary(_) => {
                let _ = tx
                    .send(rpc::error_frame(&Value::Null, code::PARSE_ERROR, "Parse error"))
                    .await;
            },
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {},
        }
    }
}

async fn dispatch_frame(text: &str, orchestrator: &Arc<Orchestrator>, tx: &mpsc::Sender<String>) {
    let Ok(request) = serde_json::from_str::<Request>(text) else {
        let _ = tx
            .send(rpc::error_frame(&Value::Null, code::PARSE_ERROR, "Parse error"))
            .await;
        return;
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    if !request.has_valid_version() {
        let _ = tx
            .send(rpc::error_frame(&id, code::INVALID_REQUEST, "Invalid request"))
            .await;
        return;
    }

    match request.method.as_deref() {
        Some("tool_request") => {
            let Some(request_id) = request.id_as_string() else {
                let _ = tx
                    .send(rpc::error_frame(&id, code::INVALID_REQUEST, "Invalid request"))
                    .await;
                return;
            };
            let orchestrator = Arc::clone(orchestrator);
            let reply = ReplyHandle::new(tx.clone(), id);
            let params = request.params;
            // Own task per request: a suspended ask must not block the
            // read loop or other requests.
            tokio::spawn(async move {
                orchestrator.handle_tool_request(request_id, params, reply).await;
            });
        },
        Some("get_pending_results") => {
            let orchestrator = Arc::clone(orchestrator);
            let reply = ReplyHandle::new(tx.clone(), id);
            tokio::spawn(async move {
                orchestrator.handle_get_pending_results(reply).await;
            });
        },
        _ => {
            let _ = tx
                .send(rpc::error_frame(&id, code::METHOD_NOT_FOUND, "Method not found"))
                .await;
        },
    }
}
