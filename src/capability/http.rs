//! HTTP 能力后端
//!
//! 真实部署时每个能力是一个独立服务，走 JSON-over-HTTP：POST 请求对象，收 JSON 载荷。

use async_trait::async_trait;

use super::{CapabilityBackend, CapabilityError, CapabilityId, CapabilityRequest};

/// JSON-over-HTTP 后端
pub struct HttpBackend {
    capability: CapabilityId,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(capability: CapabilityId, endpoint: impl Into<String>) -> Self {
        Self {
            capability,
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CapabilityBackend for HttpBackend {
    fn capability(&self) -> CapabilityId {
        self.capability
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<serde_json::Value, CapabilityError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout(self.capability)
                } else {
                    CapabilityError::Unavailable(self.capability, e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(CapabilityError::Unavailable(
                self.capability,
                format!("status {}", response.status()),
            ));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(self.capability, e.to_string()))
    }
}
