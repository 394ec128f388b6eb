use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::heartbeat::Heartbeat;

/// Ошибки отправки heartbeat (для разбора и логирования)
#[derive(Debug)]
pub enum SendError {
    Network(String),
    Http { status: u16, message: String },
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Network(s) => write!(f, "Network: {}", s),
            SendError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
        }
    }
}

/// Конфигурация отправителя (api_base_url, таймаут)
#[derive(Clone)]
pub struct SenderConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://waka.hackclub.com".to_string(),
            http_timeout_secs: 10,
        }
    }
}

/// Отправитель heartbeat: один POST на событие, fire-and-forget.
/// Без повторов, без очередей на диске — неудача только логируется.
#[derive(Clone)]
pub struct HeartbeatSender {
    api_base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HeartbeatSender {
    pub fn new(api_key: String) -> Self {
        Self::new_with_config(api_key, SenderConfig::default())
    }

    pub fn new_with_config(api_key: String, config: SenderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base_url: config.api_base_url,
            api_key,
            client,
        }
    }

    /// Собрать запрос без отправки. Отдельный шаг, чтобы тесты могли
    /// проверить URL, заголовки и тело без сети.
    pub fn build_request(&self, heartbeat: &Heartbeat) -> reqwest::RequestBuilder {
        let url = format!("{}/api/heartbeats", self.api_base_url);
        self.client
            .post(&url)
            .header("Authorization", format!("Basic {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&heartbeat.payload())
    }

    /// Отправить один heartbeat. Успех — строго HTTP 201,
    /// любой другой статус считается ошибкой.
    pub async fn send(&self, heartbeat: &Heartbeat) -> Result<u16, SendError> {
        let response = self
            .build_request(heartbeat)
            .send()
            .await
            .map_err(|e| SendError::Network(e.to_string()))?;

        let status = response.status();
        let status_code = status.as_u16();
        if status_code == 201 {
            debug!(
                "[HEARTBEAT] Sent {} for {}",
                heartbeat.category.as_str(),
                heartbeat.entity
            );
            return Ok(status_code);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("Unknown").into()
        } else {
            body
        };
        Err(SendError::Http {
            status: status_code,
            message,
        })
    }
}
