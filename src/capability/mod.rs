//! 能力端点统一调用封装
//!
//! 每个专用能力（内容生成、测评、自适应档案、陪伴激励、分析、语音）都是
//! 合同边界之外的黑盒服务，这里只定义统一的请求/结果形状与调用纪律：
//! - 封闭的能力枚举（分发逻辑可被编译器穷举检查，而非鸭子类型）
//! - 每次调用携带截止时间，超时返回 `Timeout` 而不是挂起调用方
//! - 失败归一为 Timeout / Unavailable / InvalidResponse 三类，由编排层决定重试或降级

mod backend;
mod client;
mod http;

pub use backend::{CapabilityBackend, MockBackend};
pub use client::CapabilityClient;
pub use http::HttpBackend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 能力标识（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    /// 内容生成（讲解、例题）
    Content,
    /// 测评（判分、反馈）
    Assessment,
    /// 自适应档案（难度调整建议）
    Adaptive,
    /// 陪伴激励（游戏化、鼓励语）
    Engagement,
    /// 学习分析（趋势、最佳学习时段）
    Analytics,
    /// 语音交互
    Voice,
}

impl CapabilityId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Assessment => "assessment",
            Self::Adaptive => "adaptive",
            Self::Engagement => "engagement",
            Self::Analytics => "analytics",
            Self::Voice => "voice",
        }
    }

    /// 全部能力（注册表自检用）
    pub fn all() -> [CapabilityId; 6] {
        [
            Self::Content,
            Self::Assessment,
            Self::Adaptive,
            Self::Engagement,
            Self::Analytics,
            Self::Voice,
        ]
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次能力调用的请求（临时值对象，不持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub capability: CapabilityId,
    pub student_id: String,
    pub subject: String,
    pub topic: String,
    /// 能力相关的自由载荷（上一步结果、客户端参数等）
    pub payload: serde_json::Value,
    /// 截止时间，必须在未来；超过即 Timeout
    pub deadline: DateTime<Utc>,
}

impl CapabilityRequest {
    pub fn new(
        capability: CapabilityId,
        student_id: impl Into<String>,
        subject: impl Into<String>,
        topic: impl Into<String>,
        payload: serde_json::Value,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            capability,
            student_id: student_id.into(),
            subject: subject.into(),
            topic: topic.into(),
            payload,
            deadline,
        }
    }
}

/// 一次能力调用的结果（临时值对象，不持久化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub capability: CapabilityId,
    /// 能力返回的 JSON 对象
    pub payload: serde_json::Value,
    pub produced_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// 能力级失败（由编排层吸收，从不原样透出给客户端）
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    /// 能力超过截止时间
    #[error("capability {0} timed out")]
    Timeout(CapabilityId),

    /// 传输层失败（连接拒绝、5xx 等）
    #[error("capability {0} unavailable: {1}")]
    Unavailable(CapabilityId, String),

    /// 能力返回了格式不合法的数据
    #[error("capability {0} returned invalid response: {1}")]
    InvalidResponse(CapabilityId, String),

    /// 会话暂停/放弃导致调用被取消
    #[error("capability {0} invocation cancelled")]
    Cancelled(CapabilityId),

    /// 注册表中没有该能力的后端
    #[error("no backend registered for capability {0}")]
    NotRegistered(CapabilityId),
}

impl CapabilityError {
    pub fn capability(&self) -> CapabilityId {
        match self {
            Self::Timeout(c)
            | Self::Unavailable(c, _)
            | Self::InvalidResponse(c, _)
            | Self::Cancelled(c)
            | Self::NotRegistered(c) => *c,
        }
    }

    /// 传输层失败才值得在截止时间内重试；超时/坏响应重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_, _))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_id_roundtrip() {
        for id in CapabilityId::all() {
            let json = serde_json::to_string(&id).unwrap();
            let back: CapabilityId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, back);
        }
        assert_eq!(
            serde_json::to_string(&CapabilityId::Assessment).unwrap(),
            "\"assessment\""
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CapabilityError::Unavailable(CapabilityId::Content, "refused".into()).is_retryable());
        assert!(!CapabilityError::Timeout(CapabilityId::Content).is_retryable());
        assert!(!CapabilityError::InvalidResponse(CapabilityId::Voice, "not json".into()).is_retryable());
    }
}
