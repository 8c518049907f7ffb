//! 编排层错误类型与降级动作
//!
//! 与回合流水线配合：能力失败先被吸收，按 DegradeDecision 决定
//! ServeCached / Skip / PromptRetry，只有会话状态机违规作为硬错误返回客户端。

use thiserror::Error;

use super::session::SessionStatus;
use crate::capability::CapabilityId;

/// 编排层错误（会话状态机违规、回合顺序违规等）
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// 客户端协议违规：在当前状态下不允许该动作
    #[error("invalid transition: session is {status:?}, cannot {action}")]
    InvalidTransition {
        status: SessionStatus,
        action: &'static str,
    },

    /// 回合计数器乱序（既不是下一回合，也不是已提交回合的重放）
    #[error("turn out of order: expected {expected}, got {got}")]
    TurnOutOfOrder { expected: u64, got: u64 },

    /// 回合进行中会话被暂停/废弃，在途能力调用已取消
    #[error("turn cancelled by session transition")]
    TurnCancelled,
}

impl CoordinatorError {
    /// 是否客户端协议违规（HTTP 层映射为 4xx）
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::InvalidTransition { .. }
                | Self::TurnOutOfOrder { .. }
        )
    }
}

/// 能力失败时回合流水线的降级决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeDecision {
    /// 非必需能力：用该学生最近一次成功结果顶上
    ServeCached,
    /// 非必需能力且无缓存：本回合略过该能力
    Skip,
    /// 必需能力：整个回合转为结构化重试响应，不提交任何状态
    PromptRetry(CapabilityId),
}

impl DegradeDecision {
    /// 根据能力是否必需、是否有最近成功缓存做裁决
    pub fn decide(capability: CapabilityId, required: bool, has_cached: bool) -> Self {
        if required {
            Self::PromptRetry(capability)
        } else if has_cached {
            Self::ServeCached
        } else {
            Self::Skip
        }
    }
}
