//! 学伴状态：情绪、信心、有界记忆
//!
//! 情绪转换算法：由回合摘要（正确率、作答延迟、明确挫败信号）算出情绪分，
//! 经固定阈值映射到五种情绪；信心值取最近 N 次情绪分的指数滑动平均，
//! 避免单回合情绪鞭打。记忆是 FIFO 有界环，超容量淘汰最旧，保留近因偏好。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CompanionSection;

use super::keyed::KeyedState;

/// 学伴情绪（五值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    #[default]
    Happy,
    Encouraging,
    Concerned,
    Excited,
    Proud,
}

/// 学伴性格标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityTrait {
    Encouraging,
    Playful,
    Wise,
    Patient,
    Energetic,
}

/// 一次交互的摘要（回合结束或离线事件回放时产生）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionSummary {
    /// 本次表现分 [0,1]（测评分数或客户端上报）
    pub performance: f64,
    /// 作答耗时（秒）
    pub response_secs: u64,
    /// 尝试次数
    pub attempts: u32,
    /// 是否完成
    pub completed: bool,
    /// 客户端明确上报的挫败信号
    pub frustration_signal: bool,
    /// 一句话描述（进入学伴记忆）
    pub note: String,
}

/// 学伴记忆条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub at: DateTime<Utc>,
    pub mood: Mood,
    pub sentiment: f64,
    pub note: String,
}

/// 单个学生的学伴状态（生命周期覆盖学生全历史）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionState {
    pub student_id: String,
    pub mood: Mood,
    /// 最近 N 次情绪分的 EMA，[0,1]
    pub confidence: f64,
    /// 有界 FIFO 记忆（最旧先淘汰）
    pub memory: VecDeque<MemoryEntry>,
    pub personality_traits: Vec<PersonalityTrait>,
    pub interaction_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl CompanionState {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            mood: Mood::Happy,
            confidence: 0.5,
            memory: VecDeque::new(),
            personality_traits: vec![PersonalityTrait::Encouraging, PersonalityTrait::Playful],
            interaction_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// 应用一次交互摘要：情绪转换 + EMA 信心 + 记忆写入
    pub fn apply(&mut self, summary: &InteractionSummary, cfg: &CompanionSection) -> f64 {
        let sentiment = sentiment_score(summary);
        self.mood = map_mood(sentiment, summary, cfg);

        // EMA：alpha = 2 / (N + 1)
        let alpha = 2.0 / (cfg.ema_window as f64 + 1.0);
        self.confidence = (alpha * sentiment + (1.0 - alpha) * self.confidence).clamp(0.0, 1.0);

        if self.memory.len() >= cfg.memory_capacity {
            self.memory.pop_front();
        }
        self.memory.push_back(MemoryEntry {
            at: Utc::now(),
            mood: self.mood,
            sentiment,
            note: summary.note.clone(),
        });

        self.interaction_count += 1;
        self.updated_at = Utc::now();
        sentiment
    }
}

/// 情绪分：以表现分为基数，按延迟/尝试次数/完成度/挫败信号修正，钳制到 [0,1]
fn sentiment_score(summary: &InteractionSummary) -> f64 {
    let mut score = summary.performance;

    if summary.response_secs < 180 {
        score += 0.1;
    } else if summary.response_secs > 600 {
        score -= 0.1;
    }

    if summary.attempts <= 1 {
        score += 0.2;
    } else if summary.attempts > 3 {
        score -= 0.15;
    }

    if !summary.completed {
        score -= 0.3;
    }
    if summary.frustration_signal {
        score -= 0.2;
    }

    score.clamp(0.0, 1.0)
}

fn success_indicators(summary: &InteractionSummary) -> usize {
    let mut n = 0;
    if summary.performance > 0.8 {
        n += 1;
    }
    if summary.attempts <= 1 {
        n += 1;
    }
    if summary.response_secs < 180 {
        n += 1;
    }
    if summary.completed && summary.performance > 0.6 {
        n += 1;
    }
    n
}

fn frustration_indicators(summary: &InteractionSummary) -> usize {
    let mut n = 0;
    if summary.attempts > 3 {
        n += 1;
    }
    if summary.response_secs > 900 {
        n += 1;
    }
    if !summary.completed {
        n += 1;
    }
    if summary.performance < 0.4 {
        n += 1;
    }
    if summary.frustration_signal {
        n += 1;
    }
    n
}

fn map_mood(sentiment: f64, summary: &InteractionSummary, cfg: &CompanionSection) -> Mood {
    if sentiment > cfg.excited_threshold && success_indicators(summary) >= 2 {
        Mood::Excited
    } else if sentiment > cfg.proud_threshold {
        if summary.performance > 0.8 {
            Mood::Proud
        } else {
            Mood::Happy
        }
    } else if frustration_indicators(summary) >= 2 || sentiment < cfg.concerned_threshold {
        Mood::Concerned
    } else if sentiment < cfg.encouraging_threshold {
        Mood::Encouraging
    } else {
        Mood::Happy
    }
}

/// 学伴状态仓库：按学生逐键加锁，单写者纪律
pub struct CompanionStore {
    states: KeyedState<CompanionState>,
    cfg: CompanionSection,
}

impl CompanionStore {
    pub fn new(cfg: CompanionSection) -> Self {
        Self {
            states: KeyedState::new(),
            cfg,
        }
    }

    /// 原子读-改-写：同一学生串行，不同学生互不阻塞；返回更新后快照
    pub async fn update_mood(
        &self,
        student_id: &str,
        summary: &InteractionSummary,
    ) -> CompanionState {
        let cell = self
            .states
            .entry(student_id, || CompanionState::new(student_id))
            .await;
        let mut state = cell.lock().await;
        let sentiment = state.apply(summary, &self.cfg);
        tracing::debug!(
            student_id,
            mood = ?state.mood,
            sentiment,
            confidence = state.confidence,
            "companion mood updated"
        );
        state.clone()
    }

    /// 当前快照（不存在时返回 None，不隐式建档）
    pub async fn snapshot(&self, student_id: &str) -> Option<CompanionState> {
        let cell = self.states.get(student_id).await?;
        let state = cell.lock().await;
        Some(state.clone())
    }
}
