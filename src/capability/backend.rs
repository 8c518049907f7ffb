//! 能力后端抽象
//!
//! 所有后端（HTTP 真实服务 / Mock）实现 CapabilityBackend；编排层只依赖这一 trait，
//! 不关心能力背后是什么模型或数据源。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{CapabilityError, CapabilityId, CapabilityRequest};

/// 能力后端 trait：单次调用，返回 JSON 载荷或能力级失败
#[async_trait]
pub trait CapabilityBackend: Send + Sync {
    /// 后端对应的能力
    fn capability(&self) -> CapabilityId;

    /// 调用能力（后端自身不负责截止时间，由 CapabilityClient 统一裁决）
    async fn invoke(&self, request: &CapabilityRequest) -> Result<serde_json::Value, CapabilityError>;
}

/// Mock 后端（用于测试与本地演示，无需外部服务）
///
/// 默认按能力类型返回确定性载荷；可注入延迟或失败来演练降级路径。
pub struct MockBackend {
    capability: CapabilityId,
    delay: Option<Duration>,
    failure: Option<CapabilityError>,
    /// 测评能力返回的分数
    score: f64,
}

impl MockBackend {
    pub fn healthy(capability: CapabilityId) -> Self {
        Self {
            capability,
            delay: None,
            failure: None,
            score: 0.75,
        }
    }

    /// 每次调用前先 sleep 指定时长（配合短截止时间演练 Timeout）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 每次调用直接返回指定失败
    pub fn with_failure(mut self, failure: CapabilityError) -> Self {
        self.failure = Some(failure);
        self
    }

    /// 固定测评分数（assessment 能力）
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}

#[async_trait]
impl CapabilityBackend for MockBackend {
    fn capability(&self) -> CapabilityId {
        self.capability
    }

    async fn invoke(&self, request: &CapabilityRequest) -> Result<serde_json::Value, CapabilityError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        Ok(match self.capability {
            CapabilityId::Content => json!({
                "kind": "explanation",
                "topic": request.topic,
                "body": format!("Mock lesson for {} / {}", request.subject, request.topic),
            }),
            CapabilityId::Assessment => json!({
                "score": self.score,
                "correct": 3,
                "total": 4,
                "feedback": "Good performance with room for improvement",
            }),
            CapabilityId::Adaptive => json!({
                "difficulty_adjustment": "maintain",
                "recommended_pace": "moderate",
            }),
            CapabilityId::Engagement => json!({
                "gamification_enabled": true,
                "motivation_type": "achievement",
                "encouragement": format!("Keep going with {}!", request.topic),
            }),
            CapabilityId::Analytics => json!({
                "engagement_level": "high",
                "optimal_study_hour": 16,
            }),
            CapabilityId::Voice => json!({
                "transcript": "",
                "tts_ready": true,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(capability: CapabilityId) -> CapabilityRequest {
        CapabilityRequest::new(
            capability,
            "s1",
            "Mathematics",
            "Fractions",
            json!({}),
            Utc::now() + chrono::Duration::seconds(5),
        )
    }

    #[tokio::test]
    async fn test_mock_content_payload() {
        let backend = MockBackend::healthy(CapabilityId::Content);
        let payload = backend.invoke(&request(CapabilityId::Content)).await.unwrap();
        assert_eq!(payload["topic"], "Fractions");
        assert!(payload["body"].as_str().unwrap().contains("Mathematics"));
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let backend = MockBackend::healthy(CapabilityId::Analytics)
            .with_failure(CapabilityError::Unavailable(CapabilityId::Analytics, "down".into()));
        let err = backend.invoke(&request(CapabilityId::Analytics)).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(CapabilityId::Analytics, _)));
    }
}
