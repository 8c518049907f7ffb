//! 学习会话编排
//!
//! 编排层是整个后端的根组件：持有会话状态机，每个回合决定调用哪些能力、
//! 并行还是串行，吸收能力失败并降级，把能力结果、学伴情绪、档案更新
//! 合并成一个响应，并向通知调度器发射事件。
//!
//! 回合流水线（固定顺序）：
//! 1. 校验状态机与回合序号（重放命中直接返回缓存响应）
//! 2. 按意图生成能力计划，必需 + 可选并行调用，顺序依赖串行追加
//! 3. 必需能力失败 → 结构化重试响应，不提交任何状态
//! 4. 可选能力失败 → 最近成功缓存顶上或略过
//! 5. 学伴情绪更新 → 档案更新（带冲突规则）→ 事件发射
//! 6. 提交回合计数器并缓存响应（幂等重放用）

pub mod error;
pub mod intent;
pub mod session;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

pub use error::{CoordinatorError, DegradeDecision};
pub use intent::{CapabilityPlan, TurnIntent};
pub use session::{LearningSession, SessionId, SessionManager, SessionStatus};

use crate::capability::{
    CapabilityClient, CapabilityError, CapabilityId, CapabilityRequest, CapabilityResult,
};
use crate::config::AppConfig;
use crate::notify::{Notification, NotificationKind, NotificationScheduler};
use crate::reconcile::{OfflineProgressEvent, ReconciliationReport, Reconciler};
use crate::store::{
    AdaptiveProfile, ApplyOutcome, CompanionState, CompanionStore, InteractionSummary, Mood,
    ProfileStore, ProfileUpdate, StudentId,
};

/// 回合请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    /// 必须等于已提交回合数 + 1；等于已提交回合数时按幂等重放处理
    pub turn_counter: u64,
    pub intent: TurnIntent,
    #[serde(default)]
    pub payload: TurnPayload,
}

/// 回合载荷：客户端观测到的本回合交互情况
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnPayload {
    /// 切换当前主题（不传则沿用会话当前主题）
    pub topic: Option<String>,
    pub student_input: Option<String>,
    /// 学生作答耗时（秒）
    pub response_secs: u64,
    pub attempts: u32,
    pub completed: bool,
    pub frustration_signal: bool,
    pub voice_requested: bool,
}

/// 回合结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// 必需能力失败，请客户端原样重提本回合
    Retry,
}

/// 编排层发射的事件（通知调度器消费，同时回显给客户端）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    AchievementUnlocked { topic: String },
    MilestoneReached { completed_topics: usize },
    OptimalStudyTime { hour: u32 },
}

/// 合并后的回合响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    pub session_id: String,
    pub turn_counter: u64,
    pub status: TurnStatus,
    /// status 为 Retry 时的用户可见提示
    pub retry_hint: Option<String>,
    /// 各能力载荷（能力名 -> JSON）
    pub capabilities: BTreeMap<String, Value>,
    /// 本回合以最近成功缓存顶上的能力
    pub degraded: Vec<String>,
    pub mood: Option<Mood>,
    pub confidence: Option<f64>,
    pub recommendations: Vec<String>,
    pub events: Vec<CoordinatorEvent>,
}

/// 会话收尾汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub student_id: String,
    pub status: SessionStatus,
    pub turns: u64,
    pub topics_touched: Vec<String>,
    pub average_score: Option<f64>,
    pub duration_secs: i64,
    pub mood: Option<Mood>,
}

/// 学生全景快照（学伴 + 档案）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentInsights {
    pub student_id: StudentId,
    pub companion: Option<CompanionState>,
    pub profile: Option<AdaptiveProfile>,
    /// 该学生名下的非终态会话数
    pub active_sessions: usize,
}

/// 回合准入裁决
enum Admission {
    /// 幂等重放：直接返回上次已提交的响应
    Replay(TurnResponse),
    /// 放行：携带会话上下文与本回合取消令牌
    Proceed {
        student_id: String,
        subject: String,
        topic: String,
        cancel: CancellationToken,
    },
}

/// 会话编排器
pub struct Coordinator {
    cfg: AppConfig,
    capabilities: CapabilityClient,
    companions: Arc<CompanionStore>,
    profiles: Arc<ProfileStore>,
    sessions: Arc<SessionManager>,
    reconciler: Reconciler,
    notifier: NotificationScheduler,
    /// (student_id, capability) -> 最近一次成功结果（降级回退用）
    last_known: RwLock<HashMap<(StudentId, CapabilityId), CapabilityResult>>,
}

impl Coordinator {
    /// 组装编排器；返回的接收端交给 NotificationScheduler::spawn_delivery
    pub fn new(
        cfg: AppConfig,
        capabilities: CapabilityClient,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let profiles = Arc::new(ProfileStore::new());
        let companions = Arc::new(CompanionStore::new(cfg.companion.clone()));
        let (notifier, notify_rx) = NotificationScheduler::new(cfg.notify.cooldown_secs);
        let coordinator = Self {
            sessions: Arc::new(SessionManager::new(cfg.session.clone())),
            reconciler: Reconciler::new(
                profiles.clone(),
                companions.clone(),
                cfg.reconcile.clone(),
            ),
            companions,
            profiles,
            capabilities,
            notifier,
            cfg,
            last_known: RwLock::new(HashMap::new()),
        };
        (coordinator, notify_rx)
    }

    /// 全 mock 能力后端的编排器（演示与测试）
    pub fn with_mocks(cfg: AppConfig) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let capabilities = CapabilityClient::all_mock(cfg.capability.max_retries);
        Self::new(cfg, capabilities)
    }

    /// 会话管理器句柄（后台清扫用）
    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// 开启会话
    pub async fn start_session(&self, student_id: &str, subject: &str, topic: &str) -> SessionId {
        self.sessions.create(student_id, subject, topic).await
    }

    /// 处理一个学生回合
    pub async fn turn(&self, request: TurnRequest) -> Result<TurnResponse, CoordinatorError> {
        let admission = self.admit(&request).await?;
        let (student_id, subject, topic, cancel) = match admission {
            Admission::Replay(cached) => {
                tracing::debug!(
                    session_id = %request.session_id,
                    turn = request.turn_counter,
                    "turn replayed from cache"
                );
                return Ok(cached);
            }
            Admission::Proceed {
                student_id,
                subject,
                topic,
                cancel,
            } => (student_id, subject, topic, cancel),
        };

        let plan = request.intent.plan(request.payload.voice_requested);

        // 阶段二：能力调用（独立的并行，依赖的串行）
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        let mut degraded: Vec<String> = Vec::new();

        let parallel = self
            .invoke_parallel(&plan, &request, &student_id, &subject, &topic, &cancel)
            .await;
        for (capability, outcome) in parallel {
            match outcome {
                Ok(result) => {
                    self.remember(&student_id, &result).await;
                    merged.insert(capability.as_str().to_string(), result.payload);
                }
                Err(CapabilityError::Cancelled(_)) => return Err(CoordinatorError::TurnCancelled),
                Err(e) => {
                    if let Some(retry) = self
                        .degrade(&request, &student_id, capability, &plan, &e, &mut merged, &mut degraded)
                        .await
                    {
                        return Ok(retry);
                    }
                }
            }
        }

        // 顺序依赖：自适应档案能力要吃到测评结果才能跑
        if let Some(followup) = plan.followup {
            let prior = merged
                .get(CapabilityId::Assessment.as_str())
                .cloned()
                .unwrap_or(Value::Null);
            let req = self.capability_request(
                followup,
                &student_id,
                &subject,
                &topic,
                json!({ "assessment": prior }),
            );
            match self.capabilities.invoke(req, &cancel).await {
                Ok(result) => {
                    self.remember(&student_id, &result).await;
                    merged.insert(followup.as_str().to_string(), result.payload);
                }
                Err(CapabilityError::Cancelled(_)) => return Err(CoordinatorError::TurnCancelled),
                Err(e) => {
                    // 依赖链上的能力对 Assess 意图是必需的
                    tracing::warn!(
                        session_id = %request.session_id,
                        capability = %followup,
                        error = %e,
                        "required capability failed, turn converted to retry"
                    );
                    return Ok(self.retry_response(&request, followup));
                }
            }
        }

        // 会话在能力调用期间被暂停/废弃：不做任何状态合并
        if cancel.is_cancelled() {
            return Err(CoordinatorError::TurnCancelled);
        }

        // 阶段三：状态合并
        let assessment_score = merged
            .get(CapabilityId::Assessment.as_str())
            .and_then(|p| p.get("score"))
            .and_then(Value::as_f64);

        let summary = InteractionSummary {
            performance: assessment_score
                .unwrap_or(if request.payload.completed { 0.55 } else { 0.45 }),
            response_secs: request.payload.response_secs,
            attempts: request.payload.attempts,
            completed: request.payload.completed,
            frustration_signal: request.payload.frustration_signal,
            note: format!("{:?} turn on {}", request.intent, topic),
        };
        let companion = self.companions.update_mood(&student_id, &summary).await;

        let mut events = Vec::new();
        if let Some(score) = assessment_score {
            let update = ProfileUpdate {
                topic: topic.clone(),
                score,
                source_timestamp: Utc::now(),
            };
            if let ApplyOutcome::Applied { newly_mastered, .. } =
                self.profiles.apply(&student_id, &update).await
            {
                if newly_mastered {
                    events.push(CoordinatorEvent::AchievementUnlocked {
                        topic: topic.clone(),
                    });
                    let completed = self.profiles.completed_count(&student_id).await;
                    if completed % 5 == 0 {
                        events.push(CoordinatorEvent::MilestoneReached {
                            completed_topics: completed,
                        });
                    }
                }
            }
        }
        if let Some(hour) = merged
            .get(CapabilityId::Analytics.as_str())
            .and_then(|p| p.get("optimal_study_hour"))
            .and_then(Value::as_u64)
        {
            events.push(CoordinatorEvent::OptimalStudyTime { hour: hour as u32 });
        }

        let recommendations = self.recommend(&student_id, &topic, &companion).await;
        self.emit(&student_id, &events).await;

        // 阶段四：提交
        let response = TurnResponse {
            session_id: request.session_id.clone(),
            turn_counter: request.turn_counter,
            status: TurnStatus::Completed,
            retry_hint: None,
            capabilities: merged,
            degraded,
            mood: Some(companion.mood),
            confidence: Some(companion.confidence),
            recommendations,
            events,
        };
        self.sessions
            .with_session(&request.session_id, |session| {
                session.turn_counter = request.turn_counter;
                session.active_topic = topic.clone();
                session.topics_touched.insert(topic.clone());
                if let Some(score) = assessment_score {
                    session.assessment_scores.push(score);
                }
                session.cached_response = Some(response.clone());
                session.cancel_token = None;
                session.touch();
            })
            .await?;

        tracing::info!(
            session_id = %request.session_id,
            student_id = %student_id,
            turn = request.turn_counter,
            intent = ?request.intent,
            mood = ?companion.mood,
            degraded = response.degraded.len(),
            events = response.events.len(),
            "turn committed"
        );
        Ok(response)
    }

    pub async fn pause(&self, session_id: &str) -> Result<SessionStatus, CoordinatorError> {
        self.sessions
            .with_session(session_id, |session| {
                session.pause()?;
                Ok(session.status)
            })
            .await?
    }

    pub async fn resume(&self, session_id: &str) -> Result<SessionStatus, CoordinatorError> {
        self.sessions
            .with_session(session_id, |session| {
                session.resume()?;
                Ok(session.status)
            })
            .await?
    }

    /// 结束会话并生成收尾汇总
    pub async fn end(&self, session_id: &str) -> Result<SessionSummary, CoordinatorError> {
        let session = self
            .sessions
            .with_session(session_id, |session| {
                session.complete()?;
                Ok::<_, CoordinatorError>(session.clone())
            })
            .await??;

        let mood = self
            .companions
            .snapshot(&session.student_id)
            .await
            .map(|c| c.mood);
        let average_score = if session.assessment_scores.is_empty() {
            None
        } else {
            Some(session.assessment_scores.iter().sum::<f64>() / session.assessment_scores.len() as f64)
        };

        Ok(SessionSummary {
            session_id: session.id,
            student_id: session.student_id,
            status: session.status,
            turns: session.turn_counter,
            topics_touched: session.topics_touched.into_iter().collect(),
            average_score,
            duration_secs: (Utc::now() - session.started_at).num_seconds(),
            mood,
        })
    }

    /// 学生全景快照
    pub async fn insights(&self, student_id: &str) -> StudentInsights {
        StudentInsights {
            student_id: student_id.to_string(),
            companion: self.companions.snapshot(student_id).await,
            profile: self.profiles.snapshot(student_id).await,
            active_sessions: self.sessions.active_count_for(student_id).await,
        }
    }

    /// 离线进度对账（委托对账单元）
    pub async fn reconcile_offline(
        &self,
        student_id: &str,
        events: Vec<OfflineProgressEvent>,
    ) -> ReconciliationReport {
        self.reconciler.reconcile(student_id, events).await
    }

    // ---- 回合流水线内部 ----

    /// 阶段一：状态机校验 + 回合序号裁决
    async fn admit(&self, request: &TurnRequest) -> Result<Admission, CoordinatorError> {
        self.sessions
            .with_session(&request.session_id, |session| {
                if request.turn_counter == session.turn_counter {
                    if let Some(cached) = session.cached_response.clone() {
                        return Ok(Admission::Replay(cached));
                    }
                }
                let expected = session.turn_counter + 1;
                if request.turn_counter != expected {
                    return Err(CoordinatorError::TurnOutOfOrder {
                        expected,
                        got: request.turn_counter,
                    });
                }
                session.activate()?;
                // 主题切换等到回合提交时才落到会话上，Retry 回合不留痕
                let topic = request
                    .payload
                    .topic
                    .clone()
                    .unwrap_or_else(|| session.active_topic.clone());
                Ok(Admission::Proceed {
                    student_id: session.student_id.clone(),
                    subject: session.subject.clone(),
                    topic,
                    cancel: session.new_cancel_token(),
                })
            })
            .await?
    }

    fn capability_request(
        &self,
        capability: CapabilityId,
        student_id: &str,
        subject: &str,
        topic: &str,
        payload: Value,
    ) -> CapabilityRequest {
        let deadline = Utc::now() + chrono::Duration::seconds(self.cfg.capability.timeout_secs as i64);
        CapabilityRequest::new(capability, student_id, subject, topic, payload, deadline)
    }

    /// 必需 + 可选能力并行调用
    async fn invoke_parallel(
        &self,
        plan: &CapabilityPlan,
        request: &TurnRequest,
        student_id: &str,
        subject: &str,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Vec<(CapabilityId, Result<CapabilityResult, CapabilityError>)> {
        let payload = json!({
            "input": request.payload.student_input,
            "intent": request.intent,
        });
        let calls = plan
            .required
            .iter()
            .chain(plan.optional.iter())
            .map(|&capability| {
                let req = self.capability_request(capability, student_id, subject, topic, payload.clone());
                async move { (capability, self.capabilities.invoke(req, cancel).await) }
            });
        futures_util::future::join_all(calls).await
    }

    /// 能力失败的降级处理；必需能力失败时返回重试响应
    #[allow(clippy::too_many_arguments)]
    async fn degrade(
        &self,
        request: &TurnRequest,
        student_id: &str,
        capability: CapabilityId,
        plan: &CapabilityPlan,
        error: &CapabilityError,
        merged: &mut BTreeMap<String, Value>,
        degraded: &mut Vec<String>,
    ) -> Option<TurnResponse> {
        let cached = self
            .last_known
            .read()
            .await
            .get(&(student_id.to_string(), capability))
            .cloned();
        match DegradeDecision::decide(capability, plan.is_required(capability), cached.is_some()) {
            DegradeDecision::PromptRetry(capability) => {
                tracing::warn!(
                    session_id = %request.session_id,
                    capability = %capability,
                    error = %error,
                    "required capability failed, turn converted to retry"
                );
                Some(self.retry_response(request, capability))
            }
            DegradeDecision::ServeCached => {
                tracing::debug!(capability = %capability, error = %error, "serving last-known result");
                if let Some(result) = cached {
                    merged.insert(capability.as_str().to_string(), result.payload);
                    degraded.push(capability.as_str().to_string());
                }
                None
            }
            DegradeDecision::Skip => {
                tracing::debug!(capability = %capability, error = %error, "optional capability skipped");
                None
            }
        }
    }

    /// 必需能力失败时的结构化重试响应（回合计数器不提交）
    fn retry_response(&self, request: &TurnRequest, capability: CapabilityId) -> TurnResponse {
        TurnResponse {
            session_id: request.session_id.clone(),
            turn_counter: request.turn_counter,
            status: TurnStatus::Retry,
            retry_hint: Some(format!(
                "{capability} is temporarily unavailable, please resubmit this turn"
            )),
            capabilities: BTreeMap::new(),
            degraded: Vec::new(),
            mood: None,
            confidence: None,
            recommendations: Vec::new(),
            events: Vec::new(),
        }
    }

    async fn remember(&self, student_id: &str, result: &CapabilityResult) {
        self.last_known
            .write()
            .await
            .insert((student_id.to_string(), result.capability), result.clone());
    }

    /// 本回合的个性化建议
    async fn recommend(
        &self,
        student_id: &str,
        topic: &str,
        companion: &CompanionState,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        if let Some(profile) = self.profiles.snapshot(student_id).await {
            if let Some(&skill) = profile.skill_levels.get(topic) {
                if skill > 0.9 {
                    recommendations.push(format!("Ready for harder {topic} material"));
                } else if skill < 0.6 {
                    recommendations.push(format!("Review the basics of {topic} before moving on"));
                }
            }
        }
        if companion.mood == Mood::Concerned {
            recommendations.push("Consider a short break or an easier topic".to_string());
        }
        recommendations
    }

    /// 事件转通知并投递调度器（fire-and-forget）
    async fn emit(&self, student_id: &str, events: &[CoordinatorEvent]) {
        for event in events {
            let (kind, title, body) = match event {
                CoordinatorEvent::AchievementUnlocked { topic } => (
                    NotificationKind::AchievementCelebration,
                    "Achievement unlocked".to_string(),
                    format!("You mastered {topic}!"),
                ),
                CoordinatorEvent::MilestoneReached { completed_topics } => (
                    NotificationKind::MilestoneReached,
                    "Milestone reached".to_string(),
                    format!("{completed_topics} topics mastered so far"),
                ),
                CoordinatorEvent::OptimalStudyTime { hour } => (
                    NotificationKind::StudyReminder,
                    "Best study time".to_string(),
                    format!("Around {hour}:00 works best for you"),
                ),
            };
            self.notifier
                .schedule(Notification::new(student_id, kind, title, body))
                .await;
        }
    }
}
