//! The approval orchestrator.
//!
//! Owns the in-memory pending-approval map and funnels every resolution
//! path (human callback, timeout, shutdown) through [`Orchestrator::resolve`].
//! The at-most-once guarantee rests on one mechanism: whichever path
//! removes the map entry first wins; everyone else finds the entry gone
//! and no-ops. Execution, audit, message edit, and reply all happen on
//! the winner's side, in that order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wardgate_core::time::now_epoch;
use wardgate_core::{
    ApprovalAction, ApprovalCallback, ApprovalPrompt, ApprovalResponse, AuditEntry, Decision,
    MessengerAdapter, PendingRecord, Resolution, ToolArgs, ToolRequest, ToolResult,
};
use wardgate_policy::PermissionEngine;
use wardgate_services::Executor;
use wardgate_storage::Database;

use crate::error::GatewayResult;
use crate::rate_limit::RateLimiter;
use crate::rpc::{self, code};

/// Handle through which a suspended request's reply eventually travels.
///
/// Holds a clone of the connection's outgoing-frame channel plus the
/// JSON-RPC id. When the connection is gone the send fails, which is
/// exactly the signal the resolver uses to queue the result durably
/// instead.
pub struct ReplyHandle {
    tx: mpsc::Sender<String>,
    rpc_id: Value,
}

impl ReplyHandle {
    /// Bind a reply handle to an outgoing channel and correlation id.
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>, rpc_id: Value) -> Self {
        Self { tx, rpc_id }
    }

    async fn send_result(&self, result: Value) -> bool {
        self.tx
            .send(rpc::result_frame(&self.rpc_id, result))
            .await
            .is_ok()
    }

    async fn send_error(&self, code: i64, message: &str) -> bool {
        self.tx
            .send(rpc::error_frame(&self.rpc_id, code, message))
            .await
            .is_ok()
    }
}

/// In-memory bookkeeping for one suspended request.
struct PendingApproval {
    request: ToolRequest,
    /// Present while a transport might still deliver the reply; `None` for
    /// entries re-armed after a restart.
    reply: Option<ReplyHandle>,
    message_id: Option<String>,
    timer: Option<JoinHandle<()>>,
    expires_at: f64,
}

/// How a pending approval is being resolved.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// A human pressed Allow.
    Approved {
        /// Stable user id for the audit trail.
        user_id: String,
        /// Name shown in the message edit.
        display_name: String,
    },
    /// A human pressed Deny.
    Denied {
        /// Stable user id for the audit trail.
        user_id: String,
        /// Name shown in the message edit.
        display_name: String,
    },
    /// The approval window elapsed.
    Timeout,
    /// The gateway is shutting down.
    Shutdown,
}

/// What [`Orchestrator::resolve`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// This call won the race and performed the resolution.
    Resolved,
    /// Another path already resolved the request; nothing was done.
    AlreadyResolved,
}

/// What the agent is told, chosen per outcome.
enum Outgoing {
    Result(Value),
    Error(i64, String),
}

/// Per-connection-independent approval orchestrator.
pub struct Orchestrator {
    engine: PermissionEngine,
    executor: Executor,
    messenger: Arc<dyn MessengerAdapter>,
    db: Database,
    limiter: RateLimiter,
    approval_timeout: Duration,
    pending: Mutex<HashMap<String, PendingApproval>>,
}

impl Orchestrator {
    /// Wire up the orchestrator.
    #[must_use]
    pub fn new(
        engine: PermissionEngine,
        executor: Executor,
        messenger: Arc<dyn MessengerAdapter>,
        db: Database,
        limiter: RateLimiter,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            executor,
            messenger,
            db,
            limiter,
            approval_timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of approvals currently outstanding.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// The callback to register with the messenger adapter.
    #[must_use]
    pub fn approval_callback(self: &Arc<Self>) -> ApprovalCallback {
        let orchestrator = Arc::clone(self);
        Box::new(move |response: ApprovalResponse| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                let ApprovalResponse {
                    request_id,
                    action,
                    user_id,
                    username,
                    ..
                } = response;
                let display_name = username.unwrap_or_else(|| user_id.clone());
                let outcome = match action {
                    ApprovalAction::Allow => ResolveOutcome::Approved {
                        user_id,
                        display_name,
                    },
                    ApprovalAction::Deny => ResolveOutcome::Denied {
                        user_id,
                        display_name,
                    },
                };
                let _ = orchestrator.resolve(&request_id, outcome).await;
            })
        })
    }

    // ── tool_request ─────────────────────────────────────────────

    /// Service one `tool_request`. Runs in its own task per request so
    /// concurrent requests pipeline.
    pub async fn handle_tool_request(
        self: &Arc<Self>,
        request_id: String,
        params: Value,
        reply: ReplyHandle,
    ) {
        if !self.limiter.check_request().await {
            let request = lenient_request(&request_id, &params);
            self.log_audit(
                AuditEntry::new(&request, Decision::Deny)
                    .resolved(Resolution::DeniedByPolicy, "policy"),
            )
            .await;
            reply
                .send_error(code::RATE_LIMITED, "Rate limit exceeded")
                .await;
            return;
        }

        let Some(mut request) = parse_request(&request_id, &params) else {
            let request = lenient_request(&request_id, &params);
            self.log_audit(
                AuditEntry::new(&request, Decision::Deny)
                    .resolved(Resolution::DeniedByPolicy, "validator"),
            )
            .await;
            reply.send_error(code::INVALID_REQUEST, "Invalid request").await;
            return;
        };

        let (decision, signature) = match self.engine.evaluate(&request.tool_name, &request.args)
        {
            Ok(pair) => pair,
            Err(e) => {
                // The error names only the offending key; raw values are
                // never echoed back or logged.
                debug!(request_id = %request.id, error = %e, "argument validation failed");
                self.log_audit(
                    AuditEntry::new(&request, Decision::Deny)
                        .resolved(Resolution::DeniedByPolicy, "validator"),
                )
                .await;
                reply
                    .send_error(code::INVALID_REQUEST, "Invalid argument")
                    .await;
                return;
            },
        };
        request.signature = signature;

        match decision {
            Decision::Allow => self.run_allowed(request, reply).await,
            Decision::Deny => {
                self.log_audit(
                    AuditEntry::new(&request, Decision::Deny)
                        .resolved(Resolution::DeniedByPolicy, "policy"),
                )
                .await;
                reply.send_error(code::POLICY_DENIED, "Policy denied").await;
            },
            Decision::Ask => self.suspend_for_approval(request, reply).await,
        }
    }

    async fn run_allowed(&self, request: ToolRequest, reply: ReplyHandle) {
        match self.executor.execute(&request.tool_name, &request.args).await {
            Ok(data) => {
                self.log_audit(
                    AuditEntry::new(&request, Decision::Allow)
                        .resolved(Resolution::Executed, "policy")
                        .with_execution_result(data.clone()),
                )
                .await;
                reply
                    .send_result(json!({"status": "executed", "data": data}))
                    .await;
            },
            Err(e) => {
                self.log_audit(
                    AuditEntry::new(&request, Decision::Allow)
                        .resolved(Resolution::Executed, "policy")
                        .with_execution_result(json!({"error": e.to_string()})),
                )
                .await;
                reply.send_error(code::EXECUTION_FAILED, &e.to_string()).await;
            },
        }
    }

    async fn suspend_for_approval(self: &Arc<Self>, request: ToolRequest, reply: ReplyHandle) {
        let created_at = now_epoch();
        let expires_at = created_at + self.approval_timeout.as_secs_f64();
        let record = PendingRecord::new(&request, created_at, expires_at);

        // Cap check, duplicate check, durable insert, and map install under
        // one lock so concurrent asks cannot overshoot the cap or race the
        // same id.
        {
            let mut pending = self.pending.lock().await;
            if pending.len() >= self.limiter.max_pending() {
                drop(pending);
                self.log_audit(
                    AuditEntry::new(&request, Decision::Ask)
                        .resolved(Resolution::DeniedByPolicy, "policy"),
                )
                .await;
                reply
                    .send_error(code::RATE_LIMITED, "Rate limit exceeded")
                    .await;
                return;
            }
            if pending.contains_key(&request.id) {
                drop(pending);
                reply.send_error(code::INVALID_REQUEST, "Invalid request").await;
                return;
            }
            if let Err(e) = self.db.insert_pending(&record).await {
                drop(pending);
                error!(request_id = %request.id, error = %e, "failed to persist pending request");
                self.log_audit(
                    AuditEntry::new(&request, Decision::Ask)
                        .resolved(Resolution::DeniedByPolicy, "policy")
                        .with_execution_result(json!({"error": e.to_string()})),
                )
                .await;
                reply
                    .send_error(code::EXECUTION_FAILED, "Failed to persist approval request")
                    .await;
                return;
            }
            pending.insert(
                request.id.clone(),
                PendingApproval {
                    request: request.clone(),
                    reply: Some(reply),
                    message_id: None,
                    timer: None,
                    expires_at,
                },
            );
        }

        let prompt = ApprovalPrompt {
            request_id: request.id.clone(),
            signature: request.signature.clone(),
        };
        match self.messenger.send_approval(&prompt).await {
            Ok(sent) => {
                {
                    let mut pending = self.pending.lock().await;
                    if let Some(entry) = pending.get_mut(&request.id) {
                        entry.message_id = Some(sent.message_id.clone());
                    }
                }
                if let Err(e) = self
                    .db
                    .set_pending_message(&request.id, &sent.message_id, sent.chat_id)
                    .await
                {
                    warn!(request_id = %request.id, error = %e, "failed to record message id");
                }
            },
            Err(e) => {
                // Unwind completely: no prompt means no human can ever
                // approve, so failing the request now beats a silent
                // 15-minute timeout.
                warn!(request_id = %request.id, error = %e, "failed to send approval prompt");
                let entry = self.pending.lock().await.remove(&request.id);
                if let Err(e) = self.db.delete_pending(&request.id).await {
                    warn!(request_id = %request.id, error = %e, "failed to delete pending record");
                }
                self.log_audit(
                    AuditEntry::new(&request, Decision::Ask)
                        .resolved(Resolution::DeniedByPolicy, "policy")
                        .with_execution_result(json!({"error": e.to_string()})),
                )
                .await;
                if let Some(PendingApproval {
                    reply: Some(reply), ..
                }) = entry
                {
                    reply
                        .send_error(code::EXECUTION_FAILED, "Failed to deliver approval request")
                        .await;
                }
                return;
            },
        }

        self.arm_timer(&request.id).await;
        info!(
            request_id = %request.id,
            signature = %request.signature,
            "request suspended awaiting approval"
        );
    }

    /// Arm (or re-arm) the timeout timer for a pending entry, using the
    /// remaining window recorded on the entry itself.
    async fn arm_timer(self: &Arc<Self>, request_id: &str) {
        let expires_at = {
            let pending = self.pending.lock().await;
            match pending.get(request_id) {
                Some(entry) => entry.expires_at,
                None => return,
            }
        };

        let orchestrator = Arc::clone(self);
        let id = request_id.to_string();
        let delay = Duration::from_secs_f64((expires_at - now_epoch()).max(0.0));
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = orchestrator.resolve(&id, ResolveOutcome::Timeout).await;
        });

        let mut pending = self.pending.lock().await;
        match pending.get_mut(request_id) {
            Some(entry) => {
                if let Some(old) = entry.timer.replace(handle) {
                    old.abort();
                }
            },
            // Resolved while we were arming: the timer has nothing to do.
            None => handle.abort(),
        }
    }

    // ── resolution ───────────────────────────────────────────────

    /// Resolve a pending approval. Safe to call from any path, any number
    /// of times; only the first caller per request id does anything.
    pub async fn resolve(&self, request_id: &str, outcome: ResolveOutcome) -> ResolveStatus {
        let entry = self.pending.lock().await.remove(request_id);
        let Some(mut entry) = entry else {
            debug!(request_id, "resolution raced: already resolved");
            return ResolveStatus::AlreadyResolved;
        };
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }

        let request = &entry.request;
        let clock = chrono::Local::now().format("%H:%M");

        let (audit, outgoing, offline, status, detail) = match outcome {
            ResolveOutcome::Approved {
                user_id,
                display_name,
            } => match self.executor.execute(&request.tool_name, &request.args).await {
                Ok(data) => (
                    AuditEntry::new(request, Decision::Ask)
                        .resolved(Resolution::Executed, &user_id)
                        .with_execution_result(data.clone()),
                    Outgoing::Result(json!({"status": "executed", "data": data.clone()})),
                    ToolResult::executed(request_id, data),
                    "Approved",
                    format!("Approved by {display_name} at {clock}"),
                ),
                Err(e) => (
                    AuditEntry::new(request, Decision::Ask)
                        .resolved(Resolution::Executed, &user_id)
                        .with_execution_result(json!({"error": e.to_string()})),
                    Outgoing::Error(code::EXECUTION_FAILED, e.to_string()),
                    ToolResult::denied(request_id, format!("Action execution failed: {e}")),
                    "Approved",
                    format!("Approved by {display_name} at {clock} (execution failed)"),
                ),
            },
            ResolveOutcome::Denied {
                user_id,
                display_name,
            } => (
                AuditEntry::new(request, Decision::Ask)
                    .resolved(Resolution::DeniedByUser, &user_id),
                Outgoing::Error(code::USER_DENIED, "Denied by user".to_string()),
                ToolResult::denied(request_id, "Denied by user"),
                "Denied",
                format!("Denied by {display_name} at {clock}"),
            ),
            ResolveOutcome::Timeout => (
                AuditEntry::new(request, Decision::Ask).resolved(Resolution::Timeout, "timeout"),
                Outgoing::Error(code::TIMEOUT, "Approval timed out".to_string()),
                ToolResult::denied(request_id, "Approval timed out"),
                "Expired",
                "Approval timed out".to_string(),
            ),
            ResolveOutcome::Shutdown => (
                AuditEntry::new(request, Decision::Ask)
                    .resolved(Resolution::GatewayShutdown, "shutdown"),
                Outgoing::Error(code::TIMEOUT, "Gateway shutting down".to_string()),
                ToolResult::denied(request_id, "Gateway shut down before a decision was made"),
                "Shutdown",
                "Gateway shut down before a decision was made".to_string(),
            ),
        };

        self.log_audit(audit).await;

        if let Some(message_id) = &entry.message_id {
            self.messenger.update_approval(message_id, status, &detail).await;
        } else {
            debug!(request_id, "no prompt message recorded; skipping edit");
        }

        let delivered = match &entry.reply {
            Some(reply) => match &outgoing {
                Outgoing::Result(v) => reply.send_result(v.clone()).await,
                Outgoing::Error(c, m) => reply.send_error(*c, m).await,
            },
            None => false,
        };

        if delivered {
            if let Err(e) = self.db.delete_pending(request_id).await {
                warn!(request_id, error = %e, "failed to delete delivered pending record");
            }
        } else {
            match serde_json::to_string(&offline) {
                Ok(result_json) => {
                    if let Err(e) = self.db.set_pending_result(request_id, &result_json).await {
                        error!(request_id, error = %e, "failed to queue offline result");
                    }
                },
                Err(e) => error!(request_id, error = %e, "failed to serialize offline result"),
            }
            debug!(request_id, "agent offline; result queued for reconnect");
        }

        ResolveStatus::Resolved
    }

    /// Sweep every remaining pending approval at shutdown.
    pub async fn resolve_all_pending(&self) {
        let ids: Vec<String> = self.pending.lock().await.keys().cloned().collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "resolving remaining approvals as shutdown");
        }
        for id in ids {
            let _ = self.resolve(&id, ResolveOutcome::Shutdown).await;
        }
    }

    // ── get_pending_results ──────────────────────────────────────

    /// Service a `get_pending_results` drain.
    pub async fn handle_get_pending_results(&self, reply: ReplyHandle) {
        match self.db.drain_results().await {
            Ok(rows) => {
                let queued: Vec<Value> = rows
                    .iter()
                    .map(|(id, result_json)| {
                        serde_json::from_str(result_json).unwrap_or_else(|_| {
                            json!({
                                "request_id": id,
                                "status": "denied",
                                "data": "stored result was unreadable",
                            })
                        })
                    })
                    .collect();
                reply.send_result(json!({ "queued": queued })).await;
            },
            Err(e) => {
                error!(error = %e, "failed to drain pending results");
                reply
                    .send_error(code::EXECUTION_FAILED, "Failed to read pending results")
                    .await;
            },
        }
    }

    // ── startup recovery ─────────────────────────────────────────

    /// Reconcile the durable store after a restart.
    ///
    /// Rows that expired while the gateway was down are audited as
    /// timeouts and their prompts edited (best-effort). Rows still inside
    /// their window are re-armed with the remaining time, keeping the
    /// original prompt message so its buttons stay live.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; messenger edit failures are swallowed.
    pub async fn recover(self: &Arc<Self>) -> GatewayResult<(usize, usize)> {
        let now = now_epoch();

        let stale = self.db.cleanup_stale(now).await?;
        for record in &stale {
            let request = record_to_request(record);
            self.log_audit(
                AuditEntry::new(&request, Decision::Ask).resolved(Resolution::Timeout, "timeout"),
            )
            .await;
            if let Some(message_id) = &record.message_id {
                self.messenger
                    .update_approval(
                        message_id,
                        "Expired",
                        "Approval expired while the gateway was offline. Please re-request.",
                    )
                    .await;
            }
        }

        let active = self.db.load_active(now).await?;
        for record in &active {
            {
                let mut pending = self.pending.lock().await;
                pending.insert(
                    record.request_id.clone(),
                    PendingApproval {
                        request: record_to_request(record),
                        reply: None,
                        message_id: record.message_id.clone(),
                        timer: None,
                        expires_at: record.expires_at,
                    },
                );
            }
            self.arm_timer(&record.request_id).await;
        }

        if !stale.is_empty() || !active.is_empty() {
            info!(
                expired = stale.len(),
                rearmed = active.len(),
                "recovered pending approvals from previous run"
            );
        }
        Ok((stale.len(), active.len()))
    }

    async fn log_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.db.log_audit(&entry).await {
            error!(request_id = %entry.request_id, error = %e, "failed to write audit entry");
        }
    }
}

fn record_to_request(record: &PendingRecord) -> ToolRequest {
    let mut request = ToolRequest::new(
        record.request_id.clone(),
        record.tool_name.clone(),
        record.args.clone(),
    );
    request.signature = record.signature.clone();
    request
}

/// Strict parse of `tool_request` params.
fn parse_request(request_id: &str, params: &Value) -> Option<ToolRequest> {
    let tool = params.get("tool")?.as_str()?;
    let args = match params.get("args") {
        None | Some(Value::Null) => ToolArgs::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return None,
    };
    Some(ToolRequest::new(request_id, tool, args))
}

/// Best-effort parse for audit rows on rejected frames.
fn lenient_request(request_id: &str, params: &Value) -> ToolRequest {
    let tool = params
        .get("tool")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let args = params
        .get("args")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    ToolRequest::new(request_id, tool, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wardgate_config::RateLimitConfig;
    use wardgate_core::{ExecutionError, MessengerError, SentPrompt, ServiceHandler};
    use wardgate_policy::{PermissionRule, Permissions};

    // ── test doubles ─────────────────────────────────────────────

    struct StubHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ServiceHandler for StubHandler {
        async fn execute(
            &self,
            tool_name: &str,
            _args: &ToolArgs,
        ) -> Result<Value, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ExecutionError::new("upstream exploded"))
            } else {
                Ok(json!({"state": "on", "tool": tool_name}))
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    struct MockMessenger {
        sent: Mutex<Vec<ApprovalPrompt>>,
        updates: Mutex<Vec<(String, String, String)>>,
        fail_send: bool,
    }

    impl MockMessenger {
        fn new(fail_send: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                updates: Mutex::new(Vec::new()),
                fail_send,
            })
        }
    }

    #[async_trait]
    impl MessengerAdapter for MockMessenger {
        async fn send_approval(
            &self,
            prompt: &ApprovalPrompt,
        ) -> Result<SentPrompt, MessengerError> {
            if self.fail_send {
                return Err(MessengerError::Send("telegram down".to_string()));
            }
            let mut sent = self.sent.lock().await;
            sent.push(prompt.clone());
            Ok(SentPrompt {
                message_id: format!("msg-{}", sent.len()),
                chat_id: Some(42),
            })
        }

        async fn update_approval(&self, message_id: &str, status: &str, detail: &str) {
            self.updates.lock().await.push((
                message_id.to_string(),
                status.to_string(),
                detail.to_string(),
            ));
        }

        async fn set_callback(&self, _callback: ApprovalCallback) {}

        async fn start(&self) -> Result<(), MessengerError> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    struct Harness {
        orchestrator: Arc<Orchestrator>,
        messenger: Arc<MockMessenger>,
        handler: Arc<StubHandler>,
        db: Database,
        rx: mpsc::Receiver<String>,
        tx: mpsc::Sender<String>,
    }

    struct HarnessConfig {
        rules: Vec<(&'static str, Decision)>,
        defaults: Vec<(&'static str, Decision)>,
        timeout: Duration,
        limits: RateLimitConfig,
        handler_fails: bool,
        messenger_fails: bool,
    }

    impl Default for HarnessConfig {
        fn default() -> Self {
            Self {
                rules: Vec::new(),
                defaults: Vec::new(),
                timeout: Duration::from_secs(900),
                limits: RateLimitConfig {
                    max_pending_approvals: 10,
                    max_requests_per_minute: 1000,
                },
                handler_fails: false,
                messenger_fails: false,
            }
        }
    }

    async fn harness(config: HarnessConfig) -> Harness {
        let permissions = Permissions {
            rules: config
                .rules
                .iter()
                .map(|(p, a)| PermissionRule::new(*p, *a))
                .collect(),
            defaults: config
                .defaults
                .iter()
                .map(|(p, a)| PermissionRule::new(*p, *a))
                .collect(),
        };
        let engine = PermissionEngine::new(&permissions).expect("valid policy");

        let handler = Arc::new(StubHandler {
            calls: AtomicUsize::new(0),
            fail: config.handler_fails,
        });
        let mut services: HashMap<String, Arc<dyn ServiceHandler>> = HashMap::new();
        services.insert("homeassistant".to_string(), handler.clone() as _);
        let executor = Executor::new(services);

        let messenger = MockMessenger::new(config.messenger_fails);
        let db = Database::open_in_memory().await.expect("in-memory db");
        let limiter = RateLimiter::new(&config.limits);

        let orchestrator = Arc::new(Orchestrator::new(
            engine,
            executor,
            messenger.clone() as Arc<dyn MessengerAdapter>,
            db.clone(),
            limiter,
            config.timeout,
        ));

        let (tx, rx) = mpsc::channel(32);
        Harness {
            orchestrator,
            messenger,
            handler,
            db,
            rx,
            tx,
        }
    }

    impl Harness {
        fn reply(&self, id: &str) -> ReplyHandle {
            ReplyHandle::new(self.tx.clone(), json!(id))
        }

        async fn request(&self, id: &str, tool: &str, args: Value) {
            self.orchestrator
                .handle_tool_request(id.to_string(), json!({"tool": tool, "args": args}), self.reply(id))
                .await;
        }

        async fn next_frame(&mut self) -> Value {
            let frame = tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("frame within 2s")
                .expect("channel open");
            serde_json::from_str(&frame).expect("valid frame")
        }
    }

    fn approved_by(user: &str) -> ResolveOutcome {
        ResolveOutcome::Approved {
            user_id: user.to_string(),
            display_name: format!("@{user}"),
        }
    }

    // ── synchronous paths ────────────────────────────────────────

    #[tokio::test]
    async fn auto_allow_executes_audits_and_replies() {
        let mut h = harness(HarnessConfig {
            defaults: vec![("ha_get_*", Decision::Allow)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_get_state", json!({"entity_id": "sensor.temp"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["result"]["status"], "executed");
        assert_eq!(frame["result"]["data"]["state"], "on");
        assert_eq!(frame["id"], "a");
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 1);

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].decision, Decision::Allow);
        assert_eq!(audit[0].resolution, Some(Resolution::Executed));
        assert_eq!(audit[0].signature, "ha_get_state(sensor.temp)");
    }

    #[tokio::test]
    async fn policy_deny_never_reaches_the_executor() {
        let mut h = harness(HarnessConfig {
            rules: vec![("ha_call_service(lock.*)", Decision::Deny)],
            defaults: vec![("*", Decision::Allow)],
            ..HarnessConfig::default()
        })
        .await;

        h.request(
            "a",
            "ha_call_service",
            json!({"domain": "lock", "service": "unlock", "entity_id": "lock.front_door"}),
        )
        .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32003);
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 0);

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].resolution, Some(Resolution::DeniedByPolicy));
        assert_eq!(audit[0].resolved_by.as_deref(), Some("policy"));
    }

    #[tokio::test]
    async fn deny_wins_over_more_specific_allow() {
        let mut h = harness(HarnessConfig {
            rules: vec![
                ("ha_call_service(lock.front_door)", Decision::Allow),
                ("ha_call_service(lock.*)", Decision::Deny),
            ],
            ..HarnessConfig::default()
        })
        .await;

        h.request(
            "a",
            "ha_call_service",
            json!({"domain": "lock", "service": "front_door", "entity_id": "lock.front_door"}),
        )
        .await;
        assert_eq!(h.next_frame().await["error"]["code"], -32003);
    }

    #[tokio::test]
    async fn injection_attempt_rejected_before_evaluation() {
        let mut h = harness(HarnessConfig {
            defaults: vec![("*", Decision::Allow)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_get_state", json!({"entity_id": "light.*"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32600);
        // The raw argument value never appears in the error message.
        assert!(!frame["error"]["message"].as_str().unwrap().contains("light.*"));
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 0);
        assert!(h.messenger.sent.lock().await.is_empty());

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].resolved_by.as_deref(), Some("validator"));
        assert_eq!(audit[0].signature, "");
    }

    #[tokio::test]
    async fn malformed_params_rejected() {
        let mut h = harness(HarnessConfig::default()).await;
        h.orchestrator
            .handle_tool_request("a".to_string(), json!({"args": {}}), h.reply("a"))
            .await;
        assert_eq!(h.next_frame().await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn executor_failure_maps_to_32004() {
        let mut h = harness(HarnessConfig {
            defaults: vec![("*", Decision::Allow)],
            handler_fails: true,
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_get_state", json!({"entity_id": "sensor.temp"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32004);
        assert!(frame["error"]["message"]
            .as_str()
            .unwrap()
            .contains("upstream exploded"));

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(
            audit[0].execution_result,
            Some(json!({"error": "upstream exploded"}))
        );
    }

    #[tokio::test]
    async fn request_rate_limit_rejects_and_audits() {
        let mut h = harness(HarnessConfig {
            defaults: vec![("*", Decision::Allow)],
            limits: RateLimitConfig {
                max_pending_approvals: 10,
                max_requests_per_minute: 1,
            },
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_get_state", json!({"entity_id": "sensor.temp"}))
            .await;
        assert_eq!(h.next_frame().await["result"]["status"], "executed");

        h.request("b", "ha_get_state", json!({"entity_id": "sensor.temp"}))
            .await;
        assert_eq!(h.next_frame().await["error"]["code"], -32006);

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].resolution, Some(Resolution::DeniedByPolicy));
    }

    // ── ask flows ────────────────────────────────────────────────

    #[tokio::test]
    async fn ask_approve_executes_edits_and_replies() {
        let mut h = harness(HarnessConfig {
            rules: vec![("ha_call_service(*)", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request(
            "a",
            "ha_call_service",
            json!({"domain": "light", "service": "turn_on", "entity_id": "light.bedroom"}),
        )
        .await;

        // Suspended: prompt sent, no reply yet, durable twin written.
        let sent = h.messenger.sent.lock().await.clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].signature,
            "ha_call_service(light.turn_on, light.bedroom)"
        );
        assert_eq!(h.orchestrator.pending_count().await, 1);
        let record = h.db.get_pending("a").await.unwrap().unwrap();
        assert_eq!(record.message_id.as_deref(), Some("msg-1"));
        assert_eq!(record.chat_id, Some(42));

        let status = h.orchestrator.resolve("a", approved_by("guardian")).await;
        assert_eq!(status, ResolveStatus::Resolved);

        let frame = h.next_frame().await;
        assert_eq!(frame["result"]["status"], "executed");
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 1);

        let updates = h.messenger.updates.lock().await.clone();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "msg-1");
        assert_eq!(updates[0].1, "Approved");
        assert!(updates[0].2.starts_with("Approved by @guardian at "));

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].decision, Decision::Ask);
        assert_eq!(audit[0].resolution, Some(Resolution::Executed));
        assert_eq!(audit[0].resolved_by.as_deref(), Some("guardian"));

        // Delivered result removes the durable twin.
        assert!(h.db.get_pending("a").await.unwrap().is_none());
        assert_eq!(h.orchestrator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn ask_deny_replies_32001() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "test_event"}))
            .await;
        h.orchestrator
            .resolve(
                "a",
                ResolveOutcome::Denied {
                    user_id: "guardian".to_string(),
                    display_name: "@guardian".to_string(),
                },
            )
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32001);
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 0);

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].resolution, Some(Resolution::DeniedByUser));

        let updates = h.messenger.updates.lock().await.clone();
        assert_eq!(updates[0].1, "Denied");
    }

    #[tokio::test]
    async fn ask_timeout_replies_32002() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            timeout: Duration::from_millis(50),
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "test_event"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32002);

        let updates = h.messenger.updates.lock().await.clone();
        assert_eq!(updates[0].1, "Expired");

        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].resolution, Some(Resolution::Timeout));
        assert_eq!(audit[0].resolved_by.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn resolution_is_at_most_once() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "test_event"}))
            .await;

        // The callback wins; a late timeout (or any other path) no-ops.
        let first = h.orchestrator.resolve("a", approved_by("guardian")).await;
        let second = h.orchestrator.resolve("a", ResolveOutcome::Timeout).await;
        let third = h.orchestrator.resolve("a", ResolveOutcome::Shutdown).await;
        assert_eq!(first, ResolveStatus::Resolved);
        assert_eq!(second, ResolveStatus::AlreadyResolved);
        assert_eq!(third, ResolveStatus::AlreadyResolved);

        let frame = h.next_frame().await;
        assert_eq!(frame["result"]["status"], "executed");
        assert!(h.rx.try_recv().is_err());
        assert_eq!(h.db.query_audit(10).await.unwrap().len(), 1);
        assert_eq!(h.messenger.updates.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_sweeps_all_pending() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;
        h.request("b", "ha_fire_event", json!({"event_type": "event_b"}))
            .await;
        assert_eq!(h.orchestrator.pending_count().await, 2);

        h.orchestrator.resolve_all_pending().await;
        assert_eq!(h.orchestrator.pending_count().await, 0);

        let first = h.next_frame().await;
        let second = h.next_frame().await;
        assert_eq!(first["error"]["code"], -32002);
        assert_eq!(second["error"]["code"], -32002);

        let audit = h.db.query_audit(10).await.unwrap();
        assert!(audit
            .iter()
            .all(|e| e.resolution == Some(Resolution::GatewayShutdown)));
    }

    #[tokio::test]
    async fn pending_cap_rejects_excess_asks() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            limits: RateLimitConfig {
                max_pending_approvals: 1,
                max_requests_per_minute: 1000,
            },
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;
        h.request("b", "ha_fire_event", json!({"event_type": "event_b"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32006);
        assert_eq!(frame["id"], "b");
        assert_eq!(h.orchestrator.pending_count().await, 1);
        assert_eq!(h.messenger.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_pending_id_rejected() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;
        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn messenger_send_failure_unwinds_cleanly() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            messenger_fails: true,
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32004);
        assert_eq!(h.orchestrator.pending_count().await, 0);
        assert!(h.db.get_pending("a").await.unwrap().is_none());
    }

    // ── offline delivery ─────────────────────────────────────────

    #[tokio::test]
    async fn offline_resolution_queues_result_for_reconnect() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request(
            "a",
            "ha_call_service",
            json!({"domain": "light", "service": "turn_on", "entity_id": "light.bedroom"}),
        )
        .await;

        // Agent disconnects: the receiving half of its connection is gone.
        h.rx.close();

        h.orchestrator.resolve("a", approved_by("guardian")).await;
        assert_eq!(h.handler.calls.load(Ordering::SeqCst), 1);

        // The durable record survives with the queued result.
        let record = h.db.get_pending("a").await.unwrap().unwrap();
        let stored: Value = serde_json::from_str(record.result.as_deref().unwrap()).unwrap();
        assert_eq!(stored["status"], "executed");
        assert_eq!(stored["data"]["state"], "on");

        // Reconnect and drain.
        let (tx2, mut rx2) = mpsc::channel(8);
        h.orchestrator
            .handle_get_pending_results(ReplyHandle::new(tx2.clone(), json!(1)))
            .await;
        let frame: Value = serde_json::from_str(&rx2.recv().await.unwrap()).unwrap();
        let queued = frame["result"]["queued"].as_array().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0]["request_id"], "a");
        assert_eq!(queued[0]["status"], "executed");

        // A second drain is empty.
        h.orchestrator
            .handle_get_pending_results(ReplyHandle::new(tx2, json!(2)))
            .await;
        let frame: Value = serde_json::from_str(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(frame["result"]["queued"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn drain_with_nothing_queued_is_empty() {
        let h = harness(HarnessConfig::default()).await;
        let (tx, mut rx) = mpsc::channel(8);
        h.orchestrator
            .handle_get_pending_results(ReplyHandle::new(tx, json!(1)))
            .await;
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["result"]["queued"], json!([]));
    }

    // ── pipelining ───────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_requests_interleave_responses() {
        let mut h = harness(HarnessConfig {
            rules: vec![
                ("ha_fire_event(*)", Decision::Ask),
                ("ha_call_service(lock.*)", Decision::Deny),
            ],
            defaults: vec![("ha_get_*", Decision::Allow)],
            ..HarnessConfig::default()
        })
        .await;

        // a suspends, b auto-allows, c is denied.
        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;
        h.request("b", "ha_get_state", json!({"entity_id": "sensor.temp"}))
            .await;
        h.request(
            "c",
            "ha_call_service",
            json!({"domain": "lock", "service": "unlock", "entity_id": "lock.front_door"}),
        )
        .await;

        // b and c answer while a is still pending.
        let mut early: Vec<Value> = vec![h.next_frame().await, h.next_frame().await];
        early.sort_by_key(|f| f["id"].as_str().unwrap_or_default().to_string());
        assert_eq!(early[0]["id"], "b");
        assert_eq!(early[0]["result"]["status"], "executed");
        assert_eq!(early[1]["id"], "c");
        assert_eq!(early[1]["error"]["code"], -32003);

        h.orchestrator.resolve("a", approved_by("guardian")).await;
        let last = h.next_frame().await;
        assert_eq!(last["id"], "a");
        assert_eq!(last["result"]["status"], "executed");
    }

    // ── restart recovery ─────────────────────────────────────────

    #[tokio::test]
    async fn recover_expires_stale_and_rearms_live_rows() {
        let _ = tracing_subscriber::fmt().with_env_filter("sqlx=debug,wardgate_storage=trace").try_init();
        let h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        let now = now_epoch();
        let mut stale_request = ToolRequest::new("stale", "ha_fire_event", ToolArgs::new());
        stale_request.signature = "ha_fire_event(old)".to_string();
        let mut stale = PendingRecord::new(&stale_request, now - 1000.0, now - 100.0);
        stale.message_id = Some("msg-old".to_string());
        h.db.insert_pending(&stale).await.unwrap();

        let mut live_request = ToolRequest::new("live", "ha_fire_event", ToolArgs::new());
        live_request.signature = "ha_fire_event(new)".to_string();
        let mut live = PendingRecord::new(&live_request, now - 10.0, now + 0.2);
        live.message_id = Some("msg-live".to_string());
        h.db.insert_pending(&live).await.unwrap();

        let (expired, rearmed) = h.orchestrator.recover().await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(rearmed, 1);

        // Stale row: audited as timeout, prompt edited, row gone.
        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].request_id, "stale");
        assert_eq!(audit[0].resolution, Some(Resolution::Timeout));
        let updates = h.messenger.updates.lock().await.clone();
        assert_eq!(updates[0].0, "msg-old");
        assert_eq!(updates[0].1, "Expired");
        assert!(h.db.get_pending("stale").await.unwrap().is_none());

        // Live row: re-armed in memory with the original message id, and
        // its timer fires with the remaining window. With no agent
        // connected the timeout result is queued durably.
        assert_eq!(h.orchestrator.pending_count().await, 1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.orchestrator.pending_count().await, 0);
        let record = h.db.get_pending("live").await.unwrap().unwrap();
        let stored: Value = serde_json::from_str(record.result.as_deref().unwrap()).unwrap();
        assert_eq!(stored["status"], "denied");
        let updates = h.messenger.updates.lock().await.clone();
        assert_eq!(updates.last().unwrap().0, "msg-live");
        assert_eq!(updates.last().unwrap().1, "Expired");
    }

    // ── callback wiring ──────────────────────────────────────────

    #[tokio::test]
    async fn approval_callback_resolves_by_action() {
        let mut h = harness(HarnessConfig {
            rules: vec![("*", Decision::Ask)],
            ..HarnessConfig::default()
        })
        .await;

        h.request("a", "ha_fire_event", json!({"event_type": "event_a"}))
            .await;

        let callback = h.orchestrator.approval_callback();
        callback(ApprovalResponse {
            request_id: "a".to_string(),
            action: ApprovalAction::Deny,
            user_id: "12345".to_string(),
            username: Some("@guardian".to_string()),
            timestamp: now_epoch(),
        })
        .await;

        let frame = h.next_frame().await;
        assert_eq!(frame["error"]["code"], -32001);
        let audit = h.db.query_audit(10).await.unwrap();
        assert_eq!(audit[0].resolved_by.as_deref(), Some("12345"));
        let updates = h.messenger.updates.lock().await.clone();
        assert!(updates[0].2.contains("@guardian"));
    }
}
