//! 通知调度
//!
//! 消费编排层发射的事件（里程碑、最佳学习时段、庆祝），冷却窗口内同学生
//! 同类型的通知合并为一条。投递对编排层是 fire-and-forget：回合完成从不
//! 等待通知送达。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::store::StudentId;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// 最佳学习时段提醒
    StudyReminder,
    /// 成就庆祝（主题精通）
    AchievementCelebration,
    /// 阶段里程碑
    MilestoneReached,
    /// 连胜提醒
    StreakAlert,
}

/// 一条出站通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub student_id: StudentId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        student_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("notif_{}", uuid::Uuid::new_v4()),
            student_id: student_id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// 投递端点（推送通道、站内信等由外围适配器实现）
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

/// 仅写日志的端点（默认/演示）
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            student_id = %notification.student_id,
            kind = ?notification.kind,
            title = %notification.title,
            "notification delivered"
        );
        Ok(())
    }
}

/// 通知调度器：冷却去重 + 异步投递
pub struct NotificationScheduler {
    cooldown: Duration,
    /// (student, kind) → 上次放行时间
    last_sent: Mutex<HashMap<(StudentId, NotificationKind), DateTime<Utc>>>,
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationScheduler {
    pub fn new(cooldown_secs: u64) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                cooldown: Duration::seconds(cooldown_secs as i64),
                last_sent: Mutex::new(HashMap::new()),
                tx,
            },
            rx,
        )
    }

    /// 调度一条通知；冷却窗口内的重复被合并（返回 false）
    pub async fn schedule(&self, notification: Notification) -> bool {
        let key = (notification.student_id.clone(), notification.kind);
        let now = Utc::now();

        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = last_sent.get(&key) {
            if now - *last < self.cooldown {
                tracing::debug!(
                    student_id = %notification.student_id,
                    kind = ?notification.kind,
                    "notification merged into cooldown window"
                );
                return false;
            }
        }
        last_sent.insert(key, now);
        drop(last_sent);

        // 接收端关闭时静默丢弃：投递永不反压编排层
        let _ = self.tx.send(notification);
        true
    }

    /// 启动投递循环（后台任务）：失败只记日志，不重试阻塞
    pub fn spawn_delivery(
        mut rx: mpsc::UnboundedReceiver<Notification>,
        sink: std::sync::Arc<dyn NotificationSink>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = sink.deliver(&notification).await {
                    tracing::warn!(
                        student_id = %notification.student_id,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn reminder(student: &str) -> Notification {
        Notification::new(student, NotificationKind::StudyReminder, "Study time", "4 PM works best")
    }

    #[tokio::test]
    async fn test_cooldown_merges_duplicates() {
        let (scheduler, _rx) = NotificationScheduler::new(3600);

        assert!(scheduler.schedule(reminder("s1")).await);
        assert!(!scheduler.schedule(reminder("s1")).await);
        // 不同类型不受影响
        assert!(
            scheduler
                .schedule(Notification::new(
                    "s1",
                    NotificationKind::MilestoneReached,
                    "Milestone",
                    "5 topics mastered"
                ))
                .await
        );
        // 不同学生不受影响
        assert!(scheduler.schedule(reminder("s2")).await);
    }

    #[tokio::test]
    async fn test_zero_cooldown_passes_everything() {
        let (scheduler, _rx) = NotificationScheduler::new(0);
        assert!(scheduler.schedule(reminder("s1")).await);
        assert!(scheduler.schedule(reminder("s1")).await);
    }

    struct CountingSink {
        count: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn deliver(&self, _notification: &Notification) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_loop_drains_channel() {
        let (scheduler, rx) = NotificationScheduler::new(3600);
        let sink = Arc::new(CountingSink {
            count: AtomicUsize::new(0),
        });
        let handle = NotificationScheduler::spawn_delivery(rx, sink.clone());

        scheduler.schedule(reminder("s1")).await;
        scheduler.schedule(reminder("s2")).await;
        drop(scheduler);

        handle.await.unwrap();
        assert_eq!(sink.count.load(Ordering::SeqCst), 2);
    }
}
