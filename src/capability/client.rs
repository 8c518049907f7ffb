//! Capability Client：带截止时间的统一调用包装
//!
//! 保证：永不阻塞超过请求截止时间——超时返回 `Timeout` 失败而不是挂起编排层。
//! 取消令牌（会话暂停/放弃）与截止时间共同约束每次外呼。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{CapabilityBackend, CapabilityError, CapabilityId, CapabilityRequest, CapabilityResult};

/// 能力调用客户端：注册表 + 超时/重试纪律
pub struct CapabilityClient {
    backends: HashMap<CapabilityId, Arc<dyn CapabilityBackend>>,
    /// 传输层失败的最大重试次数（仅在截止时间尚有余量时）
    max_retries: u32,
}

impl CapabilityClient {
    pub fn new(max_retries: u32) -> Self {
        Self {
            backends: HashMap::new(),
            max_retries,
        }
    }

    /// 注册一个能力后端（同一能力重复注册时后注册者覆盖）
    pub fn register(&mut self, backend: Arc<dyn CapabilityBackend>) {
        self.backends.insert(backend.capability(), backend);
    }

    /// 全部六个能力都挂 Mock 后端（测试与本地演示）
    pub fn all_mock(max_retries: u32) -> Self {
        let mut client = Self::new(max_retries);
        for id in CapabilityId::all() {
            client.register(Arc::new(super::MockBackend::healthy(id)));
        }
        client
    }

    /// 按配置组装：有端点的能力走 HTTP 后端，其余用 mock（本地联调）
    pub fn from_config(cfg: &crate::config::CapabilitySection) -> Self {
        let mut client = Self::new(cfg.max_retries);
        for id in CapabilityId::all() {
            match cfg.endpoints.get(id.as_str()) {
                Some(endpoint) => client.register(Arc::new(super::HttpBackend::new(id, endpoint))),
                None => client.register(Arc::new(super::MockBackend::healthy(id))),
            }
        }
        client
    }

    /// 是否注册了某能力
    pub fn has(&self, capability: CapabilityId) -> bool {
        self.backends.contains_key(&capability)
    }

    /// 调用一个能力：传输层失败按配置重试，其余失败直接归一返回
    pub async fn invoke(
        &self,
        request: CapabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<CapabilityResult, CapabilityError> {
        let mut attempt = 0;
        loop {
            match self.invoke_once(&request, cancel).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        capability = %request.capability,
                        attempt,
                        "capability transport failure, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    async fn invoke_once(
        &self,
        request: &CapabilityRequest,
        cancel: &CancellationToken,
    ) -> Result<CapabilityResult, CapabilityError> {
        let capability = request.capability;
        let backend = self
            .backends
            .get(&capability)
            .ok_or(CapabilityError::NotRegistered(capability))?;

        // 截止时间必须在未来；已过期等价于立即超时
        let remaining = (request.deadline - chrono::Utc::now())
            .to_std()
            .map_err(|_| CapabilityError::Timeout(capability))?;

        let started = Instant::now();
        let payload = tokio::select! {
            _ = cancel.cancelled() => return Err(CapabilityError::Cancelled(capability)),
            outcome = tokio::time::timeout(remaining, backend.invoke(request)) => {
                outcome.map_err(|_| CapabilityError::Timeout(capability))??
            }
        };

        if !payload.is_object() {
            return Err(CapabilityError::InvalidResponse(
                capability,
                "payload is not a JSON object".to_string(),
            ));
        }

        Ok(CapabilityResult {
            capability,
            payload,
            produced_at: chrono::Utc::now(),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::capability::MockBackend;

    fn request_with_deadline(capability: CapabilityId, millis: i64) -> CapabilityRequest {
        CapabilityRequest::new(
            capability,
            "s1",
            "Science",
            "Photosynthesis",
            json!({}),
            Utc::now() + chrono::Duration::milliseconds(millis),
        )
    }

    #[tokio::test]
    async fn test_invoke_healthy() {
        let client = CapabilityClient::all_mock(0);
        let result = client
            .invoke(request_with_deadline(CapabilityId::Content, 2000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.capability, CapabilityId::Content);
        assert!(result.payload.is_object());
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let mut client = CapabilityClient::new(0);
        client.register(Arc::new(
            MockBackend::healthy(CapabilityId::Content).with_delay(Duration::from_secs(5)),
        ));

        let err = client
            .invoke(request_with_deadline(CapabilityId::Content, 50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout(CapabilityId::Content)));
    }

    #[tokio::test]
    async fn test_expired_deadline_is_timeout() {
        let client = CapabilityClient::all_mock(0);
        let err = client
            .invoke(request_with_deadline(CapabilityId::Content, -100), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let mut client = CapabilityClient::new(0);
        client.register(Arc::new(
            MockBackend::healthy(CapabilityId::Assessment).with_delay(Duration::from_secs(5)),
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .invoke(request_with_deadline(CapabilityId::Assessment, 2000), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_unregistered_capability() {
        let client = CapabilityClient::new(0);
        let err = client
            .invoke(request_with_deadline(CapabilityId::Voice, 1000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotRegistered(CapabilityId::Voice)));
    }
}
