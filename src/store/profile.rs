//! 自适应档案：技能水平、学习节奏、偏好难度
//!
//! 不变量：skill_levels 恒在 [0,1]；每学生的更新按时间单调——来源时间戳
//! 早于档案 last_applied 的更新被丢弃并记为 StaleUpdate，从不回退档案。

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keyed::KeyedState;

/// 学习节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearningPace {
    Slow,
    #[default]
    Moderate,
    Fast,
}

impl LearningPace {
    /// 技能 EMA 的步长：节奏越快，单次测评对技能分的牵引越大
    pub fn update_rate(&self) -> f64 {
        match self {
            Self::Slow => 0.2,
            Self::Moderate => 0.3,
            Self::Fast => 0.4,
        }
    }
}

/// 偏好难度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

/// 单个学生的自适应档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveProfile {
    pub student_id: String,
    /// topic → 技能分 [0,1]
    pub skill_levels: HashMap<String, f64>,
    pub learning_pace: LearningPace,
    pub preferred_difficulty: Difficulty,
    /// 已掌握（技能分达到精通线）的主题
    pub completed_topics: BTreeSet<String>,
    /// 最后一次成功应用的更新时间戳（冲突裁决基准）
    pub last_applied_at: DateTime<Utc>,
    /// 已应用过的离线事件幂等键（重连重试不二次应用）。
    /// 键以零填充毫秒时间戳开头，字典序即时间序，满了淘汰最旧的
    pub applied_event_keys: BTreeSet<String>,
}

/// 主题精通线：技能分达到即记入 completed_topics
pub const MASTERY_THRESHOLD: f64 = 0.8;

/// 幂等键保留上限；更早的事件由 last_applied_at 兜底判停
pub const EVENT_KEY_CAPACITY: usize = 256;

impl AdaptiveProfile {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            skill_levels: HashMap::new(),
            learning_pace: LearningPace::Moderate,
            preferred_difficulty: Difficulty::Intermediate,
            completed_topics: BTreeSet::new(),
            // epoch 起点：任何真实更新都不早于它
            last_applied_at: DateTime::<Utc>::UNIX_EPOCH,
            applied_event_keys: BTreeSet::new(),
        }
    }

    pub fn skill(&self, topic: &str) -> f64 {
        self.skill_levels.get(topic).copied().unwrap_or(0.0)
    }

    fn refresh_difficulty(&mut self) {
        if self.skill_levels.is_empty() {
            return;
        }
        let mean = self.skill_levels.values().sum::<f64>() / self.skill_levels.len() as f64;
        self.preferred_difficulty = if mean >= 0.85 {
            Difficulty::Advanced
        } else if mean >= 0.65 {
            Difficulty::Intermediate
        } else {
            Difficulty::Beginner
        };
    }
}

/// 一次档案更新（测评结果或离线事件回放）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub topic: String,
    /// 本次测评得分 [0,1]
    pub score: f64,
    /// 来源时间戳（服务端测评用产生时刻，离线事件用 client_timestamp）
    pub source_timestamp: DateTime<Utc>,
}

/// 应用结果
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// 已应用；newly_mastered 为真表示该主题首次越过精通线
    Applied { skill: f64, newly_mastered: bool },
    /// 来源时间戳早于 last_applied，被丢弃
    Stale { last_applied_at: DateTime<Utc> },
}

/// 自适应档案仓库：按学生逐键加锁
pub struct ProfileStore {
    profiles: KeyedState<AdaptiveProfile>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: KeyedState::new(),
        }
    }

    /// 应用一次更新，执行冲突规则：source_timestamp >= last_applied 才生效
    pub async fn apply(&self, student_id: &str, update: &ProfileUpdate) -> ApplyOutcome {
        let cell = self
            .profiles
            .entry(student_id, || AdaptiveProfile::new(student_id))
            .await;
        let mut profile = cell.lock().await;

        if update.source_timestamp < profile.last_applied_at {
            tracing::info!(
                student_id,
                topic = %update.topic,
                source = %update.source_timestamp,
                last_applied = %profile.last_applied_at,
                "stale profile update dropped"
            );
            return ApplyOutcome::Stale {
                last_applied_at: profile.last_applied_at,
            };
        }

        let rate = profile.learning_pace.update_rate();
        let score = update.score.clamp(0.0, 1.0);
        let old = profile.skill(&update.topic);
        let skill = (old + rate * (score - old)).clamp(0.0, 1.0);
        profile.skill_levels.insert(update.topic.clone(), skill);

        let newly_mastered =
            skill >= MASTERY_THRESHOLD && profile.completed_topics.insert(update.topic.clone());

        profile.refresh_difficulty();
        profile.last_applied_at = update.source_timestamp;

        ApplyOutcome::Applied {
            skill,
            newly_mastered,
        }
    }

    /// 幂等键查询/登记（离线对账用；registered 为假表示此键已应用过）
    pub async fn register_event_key(&self, student_id: &str, key: &str) -> bool {
        let cell = self
            .profiles
            .entry(student_id, || AdaptiveProfile::new(student_id))
            .await;
        let mut profile = cell.lock().await;
        let registered = profile.applied_event_keys.insert(key.to_string());
        while profile.applied_event_keys.len() > EVENT_KEY_CAPACITY {
            profile.applied_event_keys.pop_first();
        }
        registered
    }

    pub async fn snapshot(&self, student_id: &str) -> Option<AdaptiveProfile> {
        let cell = self.profiles.get(student_id).await?;
        let profile = cell.lock().await;
        Some(profile.clone())
    }

    /// 已掌握主题数（里程碑事件用）
    pub async fn completed_count(&self, student_id: &str) -> usize {
        match self.snapshot(student_id).await {
            Some(p) => p.completed_topics.len(),
            None => 0,
        }
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}
