//! 学习会话生命周期
//!
//! 每个会话一台小状态机：Created → Active → {Paused, Completed, Abandoned}。
//! SessionManager 统一持有全部会话，负责过期清扫（Paused 超过保留窗口、
//! Active 超过不活跃阈值都转 Abandoned，并取消在途调用）。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::error::CoordinatorError;
use super::TurnResponse;
use crate::config::SessionSection;

/// 会话 ID
pub type SessionId = String;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl SessionStatus {
    /// 终态不再接受任何转换
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

/// 单个学习会话
#[derive(Clone)]
pub struct LearningSession {
    pub id: SessionId,
    pub student_id: String,
    pub subject: String,
    pub active_topic: String,
    pub status: SessionStatus,
    /// 已提交的回合数；下一回合必须携带 turn_counter + 1
    pub turn_counter: u64,
    pub started_at: DateTime<Utc>,
    /// 最后活跃时间（清扫依据）
    pub last_active: Instant,
    /// 当前回合的取消令牌
    pub cancel_token: Option<CancellationToken>,
    /// 最近一次已提交回合的响应（幂等重放用）
    pub cached_response: Option<TurnResponse>,
    /// 会话内测评得分（收尾汇总用）
    pub assessment_scores: Vec<f64>,
    /// 本会话涉及过的主题
    pub topics_touched: BTreeSet<String>,
}

impl LearningSession {
    pub fn new(
        student_id: impl Into<String>,
        subject: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        let id = format!("session_{}", uuid::Uuid::new_v4());
        let topic = topic.into();
        let mut topics_touched = BTreeSet::new();
        topics_touched.insert(topic.clone());
        Self {
            id,
            student_id: student_id.into(),
            subject: subject.into(),
            active_topic: topic,
            status: SessionStatus::Created,
            turn_counter: 0,
            started_at: Utc::now(),
            last_active: Instant::now(),
            cancel_token: None,
            cached_response: None,
            assessment_scores: Vec::new(),
            topics_touched,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// 回合开始前的激活：Created/Paused 自动转 Active
    pub fn activate(&mut self) -> Result<(), CoordinatorError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Paused => {
                self.status = SessionStatus::Active;
                self.touch();
                Ok(())
            }
            SessionStatus::Active => {
                self.touch();
                Ok(())
            }
            status => Err(CoordinatorError::InvalidTransition {
                status,
                action: "submit turn",
            }),
        }
    }

    pub fn pause(&mut self) -> Result<(), CoordinatorError> {
        match self.status {
            SessionStatus::Active | SessionStatus::Created => {
                self.cancel();
                self.status = SessionStatus::Paused;
                self.touch();
                Ok(())
            }
            status => Err(CoordinatorError::InvalidTransition {
                status,
                action: "pause",
            }),
        }
    }

    pub fn resume(&mut self) -> Result<(), CoordinatorError> {
        match self.status {
            SessionStatus::Paused => {
                self.status = SessionStatus::Active;
                self.touch();
                Ok(())
            }
            status => Err(CoordinatorError::InvalidTransition {
                status,
                action: "resume",
            }),
        }
    }

    pub fn complete(&mut self) -> Result<(), CoordinatorError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Active | SessionStatus::Paused => {
                self.cancel();
                self.status = SessionStatus::Completed;
                self.touch();
                Ok(())
            }
            status => Err(CoordinatorError::InvalidTransition {
                status,
                action: "end",
            }),
        }
    }

    pub fn abandon(&mut self) {
        if !self.status.is_terminal() {
            self.cancel();
            self.status = SessionStatus::Abandoned;
            self.touch();
        }
    }

    /// 取消在途回合
    pub fn cancel(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }

    /// 为新回合签发取消令牌（旧令牌同时作废）
    pub fn new_cancel_token(&mut self) -> CancellationToken {
        self.cancel();
        let token = CancellationToken::new();
        self.cancel_token = Some(token.clone());
        token
    }

    /// 是否应被清扫：Paused 看保留窗口，Created/Active 看不活跃阈值
    pub fn is_expired(&self, retention: Duration, inactivity: Duration) -> bool {
        match self.status {
            SessionStatus::Paused => self.last_active.elapsed() >= retention,
            SessionStatus::Created | SessionStatus::Active => {
                self.last_active.elapsed() >= inactivity
            }
            _ => false,
        }
    }

    /// 终态会话在保留窗口内仍可重放，窗口过后可以从表中移除
    pub fn is_evictable(&self, retention: Duration) -> bool {
        self.status.is_terminal() && self.last_active.elapsed() >= retention
    }
}

/// 会话管理器
pub struct SessionManager {
    /// 所有会话（session_id -> LearningSession）
    sessions: RwLock<HashMap<SessionId, LearningSession>>,
    cfg: SessionSection,
}

impl SessionManager {
    pub fn new(cfg: SessionSection) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            cfg,
        }
    }

    /// 创建会话，返回 session_id
    pub async fn create(&self, student_id: &str, subject: &str, topic: &str) -> SessionId {
        let session = LearningSession::new(student_id, subject, topic);
        let session_id = session.id.clone();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);
        tracing::info!(session_id = %session_id, student_id, subject, "session created");
        session_id
    }

    /// 在写锁内访问会话（不存在时 SessionNotFound）
    pub async fn with_session<F, R>(&self, session_id: &str, f: F) -> Result<R, CoordinatorError>
    where
        F: FnOnce(&mut LearningSession) -> R,
    {
        let mut sessions = self.sessions.write().await;
        sessions
            .get_mut(session_id)
            .map(f)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))
    }

    /// 会话快照
    pub async fn snapshot(&self, session_id: &str) -> Option<LearningSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    /// 某学生名下的非终态会话数
    pub async fn active_count_for(&self, student_id: &str) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| s.student_id == student_id && !s.status.is_terminal())
            .count()
    }

    /// 清扫过期会话：转 Abandoned 并取消在途调用，超过保留窗口的终态会话
    /// 从表中移除，返回清扫数量
    pub async fn cleanup_expired(&self) -> usize {
        let retention = Duration::from_secs(self.cfg.retention_secs);
        let inactivity = Duration::from_secs(self.cfg.inactivity_secs);

        let mut sessions = self.sessions.write().await;
        let mut swept = 0;
        for session in sessions.values_mut() {
            if session.is_expired(retention, inactivity) {
                tracing::info!(
                    session_id = %session.id,
                    student_id = %session.student_id,
                    was = ?session.status,
                    "session abandoned by sweeper"
                );
                session.abandon();
                swept += 1;
            }
        }
        sessions.retain(|_, session| {
            if session.is_evictable(retention) {
                tracing::debug!(session_id = %session.id, "terminal session evicted");
                swept += 1;
                false
            } else {
                true
            }
        });
        swept
    }

    /// 启动后台清扫循环
    pub fn spawn_sweeper(manager: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(manager.cfg.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let swept = manager.cleanup_expired().await;
                if swept > 0 {
                    tracing::debug!(swept, "session sweep finished");
                }
            }
        })
    }
}
