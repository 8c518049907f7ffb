//! 离线进度对账
//!
//! 客户端断网期间积累的进度事件在重连后一次性上报。本模块按客户端时间戳
//! 重放这批事件，早于画像已生效时间点的事件判为 Superseded（只入历史，
//! 不改档案），结构非法的判为 Rejected，其余 Applied。全过程幂等：同一
//! 批次重复提交不会二次计分。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ReconcileSection;
use crate::store::{CompanionStore, InteractionSummary, ProfileStore, ProfileUpdate, StudentId};

/// 客户端上报的单条离线事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineProgressEvent {
    pub student_id: StudentId,
    /// 事件在客户端发生的时刻
    pub client_timestamp: DateTime<Utc>,
    /// 进度载荷，至少含 topic 与 score
    pub payload: serde_json::Value,
}

/// 单条事件的裁决
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventDisposition {
    /// 已计入画像
    Applied {
        topic: String,
        skill_after: f64,
        newly_mastered: bool,
    },
    /// 被更新的在线进度覆盖，仅存档
    Superseded { reason: String },
    /// 载荷非法
    Rejected { reason: String },
}

/// 一次对账的汇总报告
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub applied: Vec<(DateTime<Utc>, EventDisposition)>,
    pub superseded: Vec<(DateTime<Utc>, EventDisposition)>,
    pub rejected: Vec<(DateTime<Utc>, EventDisposition)>,
}

impl ReconciliationReport {
    pub fn total(&self) -> usize {
        self.applied.len() + self.superseded.len() + self.rejected.len()
    }
}

/// 事件幂等键：客户端时间戳 + 载荷的稳定散列。
/// 毫秒数零填充，保证键的字典序即时间序（画像侧按此淘汰最旧键）
fn idempotency_key(event: &OfflineProgressEvent) -> String {
    let mut hasher = DefaultHasher::new();
    event.client_timestamp.timestamp_millis().hash(&mut hasher);
    // serde_json 的 Display 对同一 Value 输出稳定
    event.payload.to_string().hash(&mut hasher);
    format!(
        "{:013}:{:016x}",
        event.client_timestamp.timestamp_millis(),
        hasher.finish()
    )
}

/// 校验并抽取载荷中的进度字段
fn parse_payload(event: &OfflineProgressEvent) -> Result<ProfileUpdate, String> {
    let topic = event
        .payload
        .get("topic")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing field: topic".to_string())?;
    let score = event
        .payload
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| "missing field: score".to_string())?;
    if !(0.0..=1.0).contains(&score) {
        return Err(format!("score out of range: {score}"));
    }
    Ok(ProfileUpdate {
        topic: topic.to_string(),
        score,
        source_timestamp: event.client_timestamp,
    })
}

/// 离线对账器
pub struct Reconciler {
    profiles: std::sync::Arc<ProfileStore>,
    companions: std::sync::Arc<CompanionStore>,
    cfg: ReconcileSection,
}

impl Reconciler {
    pub fn new(
        profiles: std::sync::Arc<ProfileStore>,
        companions: std::sync::Arc<CompanionStore>,
        cfg: ReconcileSection,
    ) -> Self {
        Self {
            profiles,
            companions,
            cfg,
        }
    }

    /// 重放一批离线事件，返回逐条裁决的报告
    pub async fn reconcile(
        &self,
        student_id: &str,
        mut events: Vec<OfflineProgressEvent>,
    ) -> ReconciliationReport {
        // 先按客户端时间戳升序，保证重放顺序与发生顺序一致
        events.sort_by_key(|e| e.client_timestamp);

        let mut report = ReconciliationReport::default();
        for event in events {
            let ts = event.client_timestamp;
            let disposition = self.reconcile_one(student_id, event).await;
            match &disposition {
                EventDisposition::Applied { .. } => report.applied.push((ts, disposition)),
                EventDisposition::Superseded { .. } => report.superseded.push((ts, disposition)),
                EventDisposition::Rejected { .. } => report.rejected.push((ts, disposition)),
            }
        }

        tracing::info!(
            student_id,
            applied = report.applied.len(),
            superseded = report.superseded.len(),
            rejected = report.rejected.len(),
            "offline reconciliation finished"
        );
        report
    }

    async fn reconcile_one(
        &self,
        student_id: &str,
        event: OfflineProgressEvent,
    ) -> EventDisposition {
        if event.student_id != student_id {
            return EventDisposition::Rejected {
                reason: format!("student mismatch: {}", event.student_id),
            };
        }

        let update = match parse_payload(&event) {
            Ok(update) => update,
            Err(reason) => {
                tracing::warn!(student_id, %reason, "offline event rejected");
                return EventDisposition::Rejected { reason };
            }
        };

        // 幂等：同一事件重复上报直接并入历史
        let key = idempotency_key(&event);
        if !self.profiles.register_event_key(student_id, &key).await {
            return EventDisposition::Superseded {
                reason: "duplicate event".to_string(),
            };
        }

        match self.profiles.apply(student_id, &update).await {
            crate::store::ApplyOutcome::Applied {
                skill,
                newly_mastered,
            } => {
                // 计入画像的事件同步喂给学伴，情绪与记忆不落下离线时段
                let summary = InteractionSummary {
                    performance: update.score,
                    response_secs: 0,
                    attempts: 1,
                    completed: true,
                    frustration_signal: false,
                    note: format!("offline progress on {}", update.topic),
                };
                self.companions.update_mood(student_id, &summary).await;
                EventDisposition::Applied {
                    topic: update.topic,
                    skill_after: skill,
                    newly_mastered,
                }
            }
            crate::store::ApplyOutcome::Stale { last_applied_at } => {
                let lag = last_applied_at - event.client_timestamp;
                if lag.num_seconds() <= self.cfg.grace_secs as i64 {
                    tracing::debug!(student_id, lag_secs = lag.num_seconds(), "stale offline event");
                } else {
                    tracing::warn!(student_id, lag_secs = lag.num_seconds(), "stale offline event");
                }
                EventDisposition::Superseded {
                    reason: format!("superseded by progress at {last_applied_at}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn event(student: &str, secs: i64, topic: &str, score: f64) -> OfflineProgressEvent {
        OfflineProgressEvent {
            student_id: student.to_string(),
            client_timestamp: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs),
            payload: json!({ "topic": topic, "score": score }),
        }
    }

    fn reconciler() -> Reconciler {
        let profiles = Arc::new(ProfileStore::new());
        let companions = Arc::new(CompanionStore::new(
            crate::config::CompanionSection::default(),
        ));
        Reconciler::new(profiles, companions, ReconcileSection::default())
    }

    #[tokio::test]
    async fn test_events_replayed_in_timestamp_order() {
        let r = reconciler();
        // 乱序提交，低分在前高分在后（按时间戳）
        let events = vec![
            event("s1", 200, "fractions", 0.9),
            event("s1", 100, "fractions", 0.3),
        ];
        let report = r.reconcile("s1", events).await;
        assert_eq!(report.applied.len(), 2);
        // 升序重放：先 0.3 再 0.9，技能以 0.9 收尾
        let EventDisposition::Applied { skill_after, .. } = &report.applied[1].1 else {
            panic!("expected applied");
        };
        assert!(*skill_after > 0.3);
    }

    #[tokio::test]
    async fn test_older_than_profile_is_superseded() {
        let r = reconciler();
        // 在线进度已推进到 t=500
        r.profiles
            .apply(
                "s1",
                &ProfileUpdate {
                    topic: "fractions".to_string(),
                    score: 0.8,
                    source_timestamp: DateTime::<Utc>::UNIX_EPOCH
                        + chrono::Duration::seconds(500),
                },
            )
            .await;

        let report = r.reconcile("s1", vec![event("s1", 100, "fractions", 0.2)]).await;
        assert_eq!(report.superseded.len(), 1);
        assert!(report.applied.is_empty());

        // 画像未被倒退
        let profile = r.profiles.snapshot("s1").await.unwrap();
        assert!(profile.skill("fractions") > 0.2);
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_idempotent() {
        let r = reconciler();
        let batch = vec![event("s1", 100, "fractions", 0.9)];
        let first = r.reconcile("s1", batch.clone()).await;
        assert_eq!(first.applied.len(), 1);
        let skill_after_first = r.profiles.snapshot("s1").await.unwrap().skill("fractions");

        let second = r.reconcile("s1", batch).await;
        assert_eq!(second.applied.len(), 0);
        assert_eq!(second.superseded.len(), 1);
        // 技能没有被二次计分
        let skill_after_second = r.profiles.snapshot("s1").await.unwrap().skill("fractions");
        assert_eq!(skill_after_first, skill_after_second);
        // 学伴只记了一次：重复上报不重复入记忆
        let companion = r.companions.snapshot("s1").await.unwrap();
        assert_eq!(companion.memory.len(), 1);
        assert!(companion.memory.front().unwrap().note.contains("fractions"));
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let r = reconciler();
        let bad = OfflineProgressEvent {
            student_id: "s1".to_string(),
            client_timestamp: Utc::now(),
            payload: json!({ "topic": "fractions" }), // 缺 score
        };
        let out_of_range = OfflineProgressEvent {
            student_id: "s1".to_string(),
            client_timestamp: Utc::now(),
            payload: json!({ "topic": "fractions", "score": 1.5 }),
        };
        let report = r.reconcile("s1", vec![bad, out_of_range]).await;
        assert_eq!(report.rejected.len(), 2);
        assert!(r.profiles.snapshot("s1").await.is_none());
    }
}
