//! Koala - Rust 个人化智能辅导后端
//!
//! 入口：加载配置，用全 mock 能力后端跑一遍本地演示会话
//! （开会话 → 学习回合 → 测评回合 → 收尾汇总）。

use std::sync::Arc;

use anyhow::Context;
use koala::config::load_config;
use koala::coordinator::{Coordinator, SessionManager, TurnIntent, TurnPayload, TurnRequest};
use koala::notify::{LogSink, NotificationScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    koala::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    tracing::info!(app = cfg.app.name.as_deref().unwrap_or("koala"), "starting demo session");
    #[cfg(feature = "async-sqlite")]
    let db_path = cfg.app.db_path.clone();

    let (coordinator, notify_rx) = Coordinator::with_mocks(cfg);
    let coordinator = Arc::new(coordinator);
    let _delivery = NotificationScheduler::spawn_delivery(notify_rx, Arc::new(LogSink));
    let _sweeper = SessionManager::spawn_sweeper(coordinator.session_manager());

    let session_id = coordinator
        .start_session("S1", "Mathematics", "Fractions")
        .await;

    let learn = coordinator
        .turn(TurnRequest {
            session_id: session_id.clone(),
            turn_counter: 1,
            intent: TurnIntent::Learn,
            payload: TurnPayload {
                student_input: Some("What is a fraction?".to_string()),
                response_secs: 300,
                attempts: 2,
                completed: true,
                ..TurnPayload::default()
            },
        })
        .await
        .context("learn turn failed")?;
    tracing::info!(mood = ?learn.mood, "learn turn finished");

    let assess = coordinator
        .turn(TurnRequest {
            session_id: session_id.clone(),
            turn_counter: 2,
            intent: TurnIntent::Assess,
            payload: TurnPayload {
                response_secs: 120,
                attempts: 1,
                completed: true,
                ..TurnPayload::default()
            },
        })
        .await
        .context("assess turn failed")?;
    tracing::info!(
        mood = ?assess.mood,
        events = assess.events.len(),
        recommendations = ?assess.recommendations,
        "assess turn finished"
    );

    let summary = coordinator.end(&session_id).await?;
    tracing::info!(
        turns = summary.turns,
        average_score = ?summary.average_score,
        "session completed"
    );

    #[cfg(feature = "async-sqlite")]
    if let Some(path) = db_path {
        let db = koala::store::StateDb::open(&path)
            .await
            .context("Failed to open state db")?;
        let insights = coordinator.insights("S1").await;
        if let Some(companion) = &insights.companion {
            db.save_companion(companion).await?;
        }
        if let Some(profile) = &insights.profile {
            db.save_profile(profile).await?;
        }
        db.save_session_json(
            &session_id,
            "S1",
            "completed",
            &serde_json::to_string(&summary)?,
        )
        .await?;
        tracing::info!(path = %path.display(), "state persisted");
    }

    Ok(())
}
