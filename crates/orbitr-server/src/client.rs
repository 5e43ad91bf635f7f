//! Typed HTTP client for a running Orbitr server, used by the operator
//! console and the integration tests.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use orbitr_protocol::StandardizedEvent;

use crate::chat::{ChatReply, ChatRequest};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status}: {detail}")]
    Api { status: u16, detail: String },
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + ?Sized)>,
    ) -> Result<T, ClientError> {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<Value>().await {
                Ok(body) => body["detail"].as_str().map(str::to_string).unwrap_or_else(|| body.to_string()),
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(ClientError::Api { status: status.as_u16(), detail });
        }
        Ok(response.json().await?)
    }

    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.send(Method::GET, path, None::<&Value>).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, ClientError> {
        self.send(Method::POST, path, body).await
    }

    pub async fn health(&self) -> Result<Value, ClientError> {
        self.get("/health").await
    }

    pub async fn insights(&self, limit: usize) -> Result<Value, ClientError> {
        self.get(&format!("/insights?limit={limit}")).await
    }

    pub async fn incidents(&self, limit: usize) -> Result<Value, ClientError> {
        self.get(&format!("/incidents?limit={limit}")).await
    }

    pub async fn incident(&self, id: &str) -> Result<Value, ClientError> {
        self.get(&format!("/incidents/{id}")).await
    }

    pub async fn summary(&self, hours: u32) -> Result<Value, ClientError> {
        self.get(&format!("/reports/summary?hours={hours}")).await
    }

    /// Pending workflows, or every workflow in `status` when given.
    pub async fn workflows(&self, status: Option<&str>) -> Result<Value, ClientError> {
        match status {
            Some(status) => self.get(&format!("/workflows?status={status}")).await,
            None => self.get("/workflows").await,
        }
    }

    pub async fn workflow(&self, id: &str) -> Result<Value, ClientError> {
        self.get(&format!("/workflows/{id}")).await
    }

    pub async fn advance(&self, id: &str, action: Option<&str>, actor_id: &str) -> Result<Value, ClientError> {
        let body = json!({ "action": action, "actor_id": actor_id });
        self.post(&format!("/workflows/{id}/advance"), Some(&body)).await
    }

    pub async fn approve(&self, id: &str, actor_id: &str) -> Result<Value, ClientError> {
        self.post(&format!("/workflows/{id}/approve"), Some(&json!({ "actor_id": actor_id }))).await
    }

    pub async fn reject(&self, id: &str, reason: Option<&str>) -> Result<Value, ClientError> {
        let body = json!({ "reason": reason, "actor_id": "operator" });
        self.post(&format!("/workflows/{id}/reject"), Some(&body)).await
    }

    pub async fn unblock(&self, id: &str, reason: Option<&str>) -> Result<Value, ClientError> {
        self.post(&format!("/workflows/{id}/unblock"), Some(&json!({ "override_reason": reason }))).await
    }

    pub async fn reset_workflow(&self, id: &str) -> Result<Value, ClientError> {
        self.post(&format!("/workflows/{id}/reset"), None).await
    }

    pub async fn post_event(&self, event: &StandardizedEvent) -> Result<Value, ClientError> {
        self.send(Method::POST, "/events", Some(event)).await
    }

    pub async fn enqueue_event(&self, event: &StandardizedEvent) -> Result<Value, ClientError> {
        self.send(Method::POST, "/events/enqueue", Some(event)).await
    }

    pub async fn policies(&self) -> Result<Value, ClientError> {
        self.get("/policies").await
    }

    pub async fn agents_status(&self) -> Result<Value, ClientError> {
        self.get("/agents/status").await
    }

    pub async fn chat(&self, message: &str) -> Result<ChatReply, ClientError> {
        let request = ChatRequest { message: message.to_string(), history: Vec::new() };
        self.send(Method::POST, "/chat", Some(&request)).await
    }

    pub async fn simulation_start(&self) -> Result<Value, ClientError> {
        self.post("/simulation/start", None).await
    }

    pub async fn simulation_stop(&self) -> Result<Value, ClientError> {
        self.post("/simulation/stop", None).await
    }

    pub async fn simulation_status(&self) -> Result<Value, ClientError> {
        self.get("/simulation/status").await
    }

    pub async fn scenarios(&self) -> Result<Value, ClientError> {
        self.get("/simulation/scenarios").await
    }

    pub async fn run_scenario(&self, name: &str) -> Result<Value, ClientError> {
        self.post(&format!("/simulation/scenario/{name}"), None).await
    }

    pub async fn quick_demo(&self) -> Result<Value, ClientError> {
        self.post("/simulation/quick-demo", None).await
    }

    pub async fn system_reset(&self) -> Result<Value, ClientError> {
        self.send(Method::DELETE, "/system/reset", None::<&Value>).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new("http://127.0.0.1:8000/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_api_error_display() {
        let err = ClientError::Api { status: 404, detail: "Workflow not found".into() };
        assert_eq!(err.to_string(), "server answered 404: Workflow not found");
    }
}
