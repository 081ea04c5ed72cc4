//! Tool dispatch: static tool→service routing over registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use wardgate_core::{ExecutionError, ServiceHandler, ToolArgs};

/// Explicit tool-to-service routing. Unlisted tools cannot execute no
/// matter what the policy says.
const TOOL_SERVICE_MAP: &[(&str, &str)] = &[
    ("ha_get_state", "homeassistant"),
    ("ha_get_states", "homeassistant"),
    ("ha_call_service", "homeassistant"),
    ("ha_fire_event", "homeassistant"),
];

/// Which service owns a tool, if any.
#[must_use]
pub fn service_for_tool(tool_name: &str) -> Option<&'static str> {
    TOOL_SERVICE_MAP
        .iter()
        .find(|(tool, _)| *tool == tool_name)
        .map(|(_, service)| *service)
}

/// Routes approved tool requests to service handlers.
pub struct Executor {
    services: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl Executor {
    /// Build an executor over a registry of service handlers keyed by
    /// service name.
    #[must_use]
    pub fn new(services: HashMap<String, Arc<dyn ServiceHandler>>) -> Self {
        Self { services }
    }

    /// Dispatch a tool request to its service handler.
    ///
    /// # Errors
    ///
    /// [`ExecutionError`] for unknown tools, unconfigured services, and
    /// handler failures. Never retries.
    pub async fn execute(&self, tool_name: &str, args: &ToolArgs) -> Result<Value, ExecutionError> {
        let service_name = service_for_tool(tool_name)
            .ok_or_else(|| ExecutionError::new(format!("Unknown tool: {tool_name}")))?;
        let handler = self.services.get(service_name).ok_or_else(|| {
            ExecutionError::new(format!("Service not configured: {service_name}"))
        })?;
        debug!(tool = tool_name, service = service_name, "dispatching tool request");
        handler.execute(tool_name, args).await
    }

    /// Close every registered handler.
    pub async fn close_all(&self) {
        for handler in self.services.values() {
            handler.close().await;
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
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
                Err(ExecutionError::new("boom"))
            } else {
                Ok(json!({"tool": tool_name}))
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn close(&self) {}
    }

    fn executor_with(handler: Arc<StubHandler>) -> Executor {
        let mut services: HashMap<String, Arc<dyn ServiceHandler>> = HashMap::new();
        services.insert("homeassistant".to_string(), handler);
        Executor::new(services)
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let handler = StubHandler::new(false);
        let executor = executor_with(handler.clone());

        let result = executor.execute("ha_get_state", &ToolArgs::new()).await.unwrap();
        assert_eq!(result, json!({"tool": "ha_get_state"}));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let executor = executor_with(StubHandler::new(false));
        let err = executor
            .execute("ha_reboot", &ToolArgs::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: ha_reboot");
    }

    #[tokio::test]
    async fn missing_service_is_an_error() {
        let executor = Executor::new(HashMap::new());
        let err = executor
            .execute("ha_get_state", &ToolArgs::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Service not configured: homeassistant");
    }

    #[tokio::test]
    async fn handler_failure_propagates() {
        let executor = executor_with(StubHandler::new(true));
        let err = executor
            .execute("ha_fire_event", &ToolArgs::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn every_ha_tool_routes_to_homeassistant() {
        for tool in ["ha_get_state", "ha_get_states", "ha_call_service", "ha_fire_event"] {
            assert_eq!(service_for_tool(tool), Some("homeassistant"));
        }
        assert_eq!(service_for_tool("other"), None);
    }
}
