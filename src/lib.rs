//! Koala - Rust 个人化智能辅导后端
//!
//! 模块划分：
//! - **capability**: 能力端点统一调用封装（内容生成 / 测评 / 自适应 / 陪伴激励 / 分析 / 语音）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **coordinator**: 学习会话编排核心（会话状态机、回合流水线、降级策略、事件发射）
//! - **notify**: 通知调度（冷却去重、异步投递）
//! - **observability**: tracing 日志初始化
//! - **reconcile**: 离线进度对账（冲突裁决、幂等应用）
//! - **store**: 学伴状态与自适应档案（按学生逐键加锁、情绪算法、可选 SQLite 持久化）

pub mod capability;
pub mod config;
pub mod coordinator;
pub mod notify;
pub mod observability;
pub mod reconcile;
pub mod store;

#[cfg(feature = "web")]
pub mod api;

pub use coordinator::{Coordinator, CoordinatorError, TurnIntent, TurnRequest, TurnResponse};
