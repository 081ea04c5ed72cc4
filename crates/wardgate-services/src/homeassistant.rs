//! Home Assistant REST API service handler.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;
use wardgate_config::HomeAssistantConfig;
use wardgate_core::{ExecutionError, ServiceHandler, ToolArgs};

/// Health-check timeout.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Service handler for the Home Assistant REST API.
pub struct HomeAssistantService {
    base_url: String,
    client: Client,
}

impl HomeAssistantService {
    /// Build a handler from endpoint configuration.
    ///
    /// # Errors
    ///
    /// [`ExecutionError`] if the HTTP client cannot be constructed (bad
    /// token bytes in the auth header).
    pub fn new(config: &HomeAssistantConfig) -> Result<Self, ExecutionError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!(
            "Bearer {}",
            config.token
        ))
        .map_err(|e| ExecutionError::new(format!("invalid Home Assistant token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ExecutionError::new(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn str_arg<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str, ExecutionError> {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutionError::new(format!("missing required argument: {key}")))
    }

    async fn get_state(&self, args: &ToolArgs) -> Result<Value, ExecutionError> {
        let entity_id = Self::str_arg(args, "entity_id")?;
        let url = format!("{}/api/states/{entity_id}", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;
        let resp = check_response(resp, Some(entity_id)).await?;
        resp.json().await.map_err(transport_error)
    }

    async fn get_states(&self) -> Result<Value, ExecutionError> {
        let url = format!("{}/api/states", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(transport_error)?;
        let resp = check_response(resp, None).await?;
        let states: Value = resp.json().await.map_err(transport_error)?;
        Ok(json!({ "states": states }))
    }

    async fn call_service(&self, args: &ToolArgs) -> Result<Value, ExecutionError> {
        let domain = Self::str_arg(args, "domain")?;
        let service = Self::str_arg(args, "service")?;
        let url = format!("{}/api/services/{domain}/{service}", self.base_url);
        // Everything except domain/service goes into the request body.
        let body: serde_json::Map<String, Value> = args
            .iter()
            .filter(|(k, _)| k.as_str() != "domain" && k.as_str() != "service")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_response(resp, None).await?;
        let result: Value = resp.json().await.map_err(transport_error)?;
        Ok(json!({ "result": result }))
    }

    async fn fire_event(&self, args: &ToolArgs) -> Result<Value, ExecutionError> {
        let event_type = Self::str_arg(args, "event_type")?;
        let url = format!("{}/api/events/{event_type}", self.base_url);
        let body: serde_json::Map<String, Value> = args
            .iter()
            .filter(|(k, _)| k.as_str() != "event_type")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = check_response(resp, None).await?;
        resp.json().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> ExecutionError {
    // reqwest error displays omit the URL's sensitive parts but keep the
    // host; that is fine to surface to the agent.
    ExecutionError::new(format!("Service unreachable: homeassistant ({e})"))
}

/// Map a non-2xx response to an [`ExecutionError`].
async fn check_response(
    resp: Response,
    entity_id: Option<&str>,
) -> Result<Response, ExecutionError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(ExecutionError::new(
            "Service authentication failed (HA token expired?)",
        )),
        StatusCode::NOT_FOUND => {
            let detail = entity_id.map(|id| format!(": {id}")).unwrap_or_default();
            Err(ExecutionError::new(format!("Entity not found{detail}")))
        },
        _ => {
            let text = resp.text().await.unwrap_or_default();
            Err(ExecutionError::new(format!(
                "Home Assistant API error {}: {text}",
                status.as_u16()
            )))
        },
    }
}

#[async_trait]
impl ServiceHandler for HomeAssistantService {
    async fn execute(&self, tool_name: &str, args: &ToolArgs) -> Result<Value, ExecutionError> {
        match tool_name {
            "ha_get_state" => self.get_state(args).await,
            "ha_get_states" => self.get_states().await,
            "ha_call_service" => self.call_service(args).await,
            "ha_fire_event" => self.fire_event(args).await,
            other => Err(ExecutionError::new(format!("Unknown tool: {other}"))),
        }
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => {
                debug!(status = %resp.status(), "Home Assistant health check");
                resp.status() == StatusCode::OK
            },
            Err(_) => false,
        }
    }

    async fn close(&self) {
        // reqwest clients release their connection pool on drop.
    }
}
