use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::types::{AgentRecord, HealthStatus, MessageItem, RunRequest, RunResponse};

use super::error::ApiError;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// 后端 REST 接口客户端
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &BackendConfig) -> Result<Self, ApiError> {
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| ApiError::InvalidUrl(format!("{}：{}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(config.base_url.clone()));
        }

        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = Client::builder().timeout(timeout).build()?;

        Ok(ApiClient {
            client,
            base_url,
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// 请求超时，流式连接的握手也用这个值
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // base_url 已在构造时校验过可以作为 base
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    /// 流式会话地址：http -> ws，https -> wss
    pub fn stream_url(&self, agent_id: &str) -> Result<Url, ApiError> {
        let mut url = self.url(&["stream", agent_id]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ApiError::InvalidUrl(url.to_string()))?;
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().clone();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(%url, %status, "backend request failed");
            return Err(ApiError::from_response(status, &text));
        }
        debug!(%url, %status, bytes = text.len(), "backend response");

        serde_json::from_str(&text).map_err(|source| ApiError::Decode { source, body: text })
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, self.url(segments))).await
    }

    async fn with_body<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(method, self.url(segments)).json(body)).await
    }

    async fn delete(&self, segments: &[&str]) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .send(self.request(Method::DELETE, self.url(segments)))
            .await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.get(&["health"]).await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, ApiError> {
        self.get(&["agents"]).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<AgentRecord, ApiError> {
        self.get(&["agents", id]).await
    }

    pub async fn create_agent(&self, agent: &AgentRecord) -> Result<AgentRecord, ApiError> {
        self.with_body(Method::POST, &["agents"], agent).await
    }

    pub async fn update_agent(
        &self,
        id: &str,
        agent: &AgentRecord,
    ) -> Result<AgentRecord, ApiError> {
        self.with_body(Method::PUT, &["agents", id], agent).await
    }

    pub async fn delete_agent(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&["agents", id]).await
    }

    /// 后台运行一轮，立即返回 run id 和对话 id
    pub async fn run_agent(&self, request: &RunRequest) -> Result<RunResponse, ApiError> {
        self.with_body(Method::POST, &["run"], request).await
    }

    pub async fn list_conversations(&self) -> Result<HashMap<String, Vec<MessageItem>>, ApiError> {
        self.get(&["conversations"]).await
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Vec<MessageItem>, ApiError> {
        self.get(&["conversations", id]).await
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&["conversations", id]).await
    }

    pub async fn get_trace(&self, run_id: &str) -> Result<serde_json::Value, ApiError> {
        self.get(&["traces", run_id]).await
    }
}
